use serde::Deserialize;

/// User-facing strings written into a post when a stream cannot finish normally.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Notices {
    /// Replaces an empty message after a successful stream.
    pub no_result: String,
    /// Replaces an empty message after a failed stream.
    pub failure: String,
    /// Appended to partial text after a failed stream.
    pub interrupted: String,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            no_result: "The model returned no response.".to_string(),
            failure: "Sorry, something went wrong while generating a response.".to_string(),
            interrupted: "_(Response interrupted by an error.)_".to_string(),
        }
    }
}

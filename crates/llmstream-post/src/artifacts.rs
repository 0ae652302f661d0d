//! Detection and extraction of artifact blocks embedded in message text.
//!
//! An artifact is written by the model as a private fenced block:
//!
//! ````text
//! ```artifact:rust title="Parser"
//! fn main() {}
//! ```
//! ````
//!
//! Fences inside the block that carry an info string open a nested block, and
//! the next bare fence closes that nested block rather than the artifact.

use serde::{Deserialize, Serialize};
use tracing::debug;

const FENCE: &str = "```";
const ARTIFACT_PREFIX: &str = "```artifact:";
const DEFAULT_TITLE: &str = "Untitled Artifact";
const DEFAULT_LANGUAGE: &str = "text";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Code,
    Document,
    Diagram,
}

impl ArtifactType {
    pub fn from_language(language: &str) -> Self {
        match language.to_ascii_lowercase().as_str() {
            "markdown" | "md" | "text" | "txt" | "document" | "html" => ArtifactType::Document,
            "mermaid" | "diagram" | "plantuml" | "dot" | "graphviz" => ArtifactType::Diagram,
            _ => ArtifactType::Code,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub title: String,
    pub language: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Header {
    language: String,
    title: String,
}

struct Block<'a> {
    header: Header,
    content: &'a str,
    closed: bool,
}

enum Segment<'a> {
    /// Text outside any artifact block, starting at byte `start` of the input.
    Prose { start: usize, text: &'a str },
    Block(Block<'a>),
}

fn parse_opening(line: &str) -> Option<Header> {
    let rest = line.strip_prefix(ARTIFACT_PREFIX)?;
    let (language, attrs) = match rest.find(char::is_whitespace) {
        Some(split) => (&rest[..split], rest[split..].trim()),
        None => (rest, ""),
    };
    let title = attrs
        .strip_prefix("title=\"")
        .and_then(|value| value.split('"').next())
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(DEFAULT_TITLE);
    let language = if language.is_empty() {
        DEFAULT_LANGUAGE
    } else {
        language
    };
    Some(Header {
        language: language.to_string(),
        title: title.to_string(),
    })
}

enum Fence {
    Bare,
    WithInfo,
}

fn fence_kind(line: &str) -> Option<Fence> {
    let rest = line.strip_prefix(FENCE)?;
    if rest.trim().is_empty() {
        Some(Fence::Bare)
    } else {
        Some(Fence::WithInfo)
    }
}

struct OpenBlock {
    header: Header,
    content_start: usize,
    depth: usize,
}

/// Splits `text` into prose and artifact blocks, line by line.
///
/// Inside an artifact, only a fence with an info string (```` ```sh ````) opens
/// a nested block. A bare fence always closes the innermost open block, so a
/// nested block opened with a bare fence ends the artifact at that line.
fn scan(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut prose_start = 0;
    let mut offset = 0;
    let mut open: Option<OpenBlock> = None;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let body = line.trim_end_matches(['\n', '\r']);

        match open.as_mut() {
            None => {
                if let Some(header) = parse_opening(body) {
                    if prose_start < line_start {
                        segments.push(Segment::Prose {
                            start: prose_start,
                            text: &text[prose_start..line_start],
                        });
                    }
                    open = Some(OpenBlock {
                        header,
                        content_start: offset,
                        depth: 0,
                    });
                }
            }
            Some(block) => match fence_kind(body) {
                Some(Fence::Bare) if block.depth == 0 => {
                    segments.push(Segment::Block(Block {
                        header: block.header.clone(),
                        content: &text[block.content_start..line_start],
                        closed: true,
                    }));
                    prose_start = offset;
                    open = None;
                }
                Some(Fence::Bare) => block.depth -= 1,
                Some(Fence::WithInfo) => block.depth += 1,
                None => {}
            },
        }
    }

    match open {
        Some(block) => segments.push(Segment::Block(Block {
            header: block.header,
            content: text.get(block.content_start..).unwrap_or(""),
            closed: false,
        })),
        None if prose_start < text.len() => segments.push(Segment::Prose {
            start: prose_start,
            text: &text[prose_start..],
        }),
        None => {}
    }
    segments
}

/// Keeps at most one blank line between paragraphs.
#[derive(Default)]
struct BlankLines {
    run: usize,
}

impl BlankLines {
    fn keep(&mut self, line: &str) -> bool {
        if line.ends_with('\n') && line.trim().is_empty() {
            self.run += 1;
            self.run == 1
        } else {
            self.run = 0;
            true
        }
    }
}

/// Prose lines that survive block removal, with their byte offset in the input.
fn prose_lines<'a>(segments: &'a [Segment<'a>]) -> impl Iterator<Item = (usize, &'a str)> + 'a {
    let mut blanks = BlankLines::default();
    segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Prose { start, text } => Some((*start, *text)),
            Segment::Block(_) => None,
        })
        .flat_map(|(start, text)| {
            text.split_inclusive('\n').scan(start, |offset, line| {
                let line_start = *offset;
                *offset += line.len();
                Some((line_start, line))
            })
        })
        .filter(move |(_, line)| blanks.keep(line))
}

fn prose(segments: &[Segment<'_>]) -> String {
    prose_lines(segments).map(|(_, line)| line).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    source: usize,
    target: usize,
    len: usize,
}

/// Maps byte offsets of a streamed message onto the text produced by
/// [`remove_markers_mapped`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OffsetMap {
    spans: Vec<Span>,
    lead: usize,
    len: usize,
}

impl OffsetMap {
    /// Maps the byte range `start..end`, narrowed to the bytes that were kept.
    /// Returns `None` when nothing of the range survives.
    pub fn range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let first = self
            .spans
            .iter()
            .find(|span| start < span.source + span.len)
            .map(|span| span.target + start.saturating_sub(span.source))?;
        let last = self
            .spans
            .iter()
            .rev()
            .find(|span| end > span.source)
            .map(|span| span.target + (end - span.source).min(span.len))?;
        let first = first.saturating_sub(self.lead).min(self.len);
        let last = last.saturating_sub(self.lead).min(self.len);
        (first < last).then_some((first, last))
    }
}

/// Text shown to observers while streaming: every artifact block, finished or
/// not, is removed.
pub fn visible_text(text: &str) -> String {
    prose(&scan(text))
}

/// Final message text with all artifact blocks and their fencing removed.
pub fn remove_markers(text: &str) -> String {
    remove_markers_mapped(text).0
}

/// Like [`remove_markers`], also returning where each kept byte of `text` ended up.
pub fn remove_markers_mapped(text: &str) -> (String, OffsetMap) {
    let segments = scan(text);
    let mut out = String::with_capacity(text.len());
    let mut spans: Vec<Span> = Vec::new();
    for (source, line) in prose_lines(&segments) {
        match spans.last_mut() {
            Some(span) if span.source + span.len == source => span.len += line.len(),
            _ => spans.push(Span {
                source,
                target: out.len(),
                len: line.len(),
            }),
        }
        out.push_str(line);
    }
    let trimmed = out.trim_start();
    let lead = out.len() - trimmed.len();
    let message = trimmed.trim_end().to_string();
    let map = OffsetMap {
        spans,
        lead,
        len: message.len(),
    };
    (message, map)
}

/// Parses every artifact block in `text`. A block still open at the end of the
/// text runs to the end. Blocks with empty content are skipped.
pub fn extract_artifacts(text: &str) -> Vec<Artifact> {
    scan(text)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Block(block) => {
                let content = block.content.trim();
                if content.is_empty() {
                    return None;
                }
                Some(Artifact {
                    artifact_type: ArtifactType::from_language(&block.header.language),
                    title: block.header.title,
                    language: block.header.language,
                    content: content.to_string(),
                })
            }
            Segment::Prose { .. } => None,
        })
        .collect()
}

/// True when an unterminated last line may still turn into a fence.
fn is_fence_prefix(tail: &str) -> bool {
    !tail.is_empty() && (FENCE.starts_with(tail) || tail.starts_with(FENCE))
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Normal,
    /// The text ends in what may become a fence; nothing is published.
    Speculative,
    /// Inside an artifact block.
    Confirmed { language: String, title: String },
}

/// What the consumer should publish after a text update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectorAction {
    /// Full visible text changed.
    Message(String),
    Generating { language: String, title: String },
    /// Cumulative content of the block being written.
    Chunk(String),
}

/// Incremental artifact detector driven by the accumulated message text.
#[derive(Debug, Default)]
pub struct ArtifactDetector {
    state: DetectorState,
    announced: usize,
    last_message: Option<String>,
    last_chunk: Option<(usize, String)>,
}

impl ArtifactDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Re-evaluates the full accumulated `text` and returns the updates that
    /// became publishable.
    pub fn update(&mut self, text: &str) -> Vec<DetectorAction> {
        let split = text.rfind('\n').map_or(0, |idx| idx + 1);
        let speculative = is_fence_prefix(&text[split..]);
        let segments = scan(if speculative { &text[..split] } else { text });

        let mut actions = Vec::new();
        let blocks: Vec<&Block<'_>> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Block(block) => Some(block),
                Segment::Prose { .. } => None,
            })
            .collect();

        for block in blocks.iter().skip(self.announced) {
            actions.push(DetectorAction::Generating {
                language: block.header.language.clone(),
                title: block.header.title.clone(),
            });
        }
        self.announced = self.announced.max(blocks.len());

        let open = blocks
            .last()
            .filter(|block| !block.closed)
            .map(|block| (blocks.len() - 1, *block));

        let next = match open {
            Some((index, block)) => {
                let changed = self
                    .last_chunk
                    .as_ref()
                    .is_none_or(|(last_index, last)| *last_index != index || last != block.content);
                if changed {
                    self.last_chunk = Some((index, block.content.to_string()));
                    actions.push(DetectorAction::Chunk(block.content.to_string()));
                }
                DetectorState::Confirmed {
                    language: block.header.language.clone(),
                    title: block.header.title.clone(),
                }
            }
            None if speculative => DetectorState::Speculative,
            None => DetectorState::Normal,
        };

        if next != DetectorState::Speculative {
            if self.state == DetectorState::Speculative && next == DetectorState::Normal {
                debug!("speculative fence resolved as ordinary text");
            }
            let message = prose(&segments);
            if self.last_message.as_ref() != Some(&message) {
                self.last_message = Some(message.clone());
                actions.push(DetectorAction::Message(message));
            }
        }
        self.state = next;
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = "Here is the parser.\n\n```artifact:markdown title=\"Guide\"\n# Usage\n\n```rust\nfn main() {}\n```\n\nDone.\n```\n\n\nThat is all.";

    #[test]
    fn nested_fence_round_trip() {
        let artifacts = extract_artifacts(NESTED);
        assert_eq!(artifacts.len(), 1);
        let artifact = &artifacts[0];
        assert_eq!(artifact.artifact_type, ArtifactType::Document);
        assert_eq!(artifact.title, "Guide");
        assert_eq!(artifact.language, "markdown");
        assert_eq!(
            artifact.content,
            "# Usage\n\n```rust\nfn main() {}\n```\n\nDone."
        );

        assert_eq!(remove_markers(NESTED), "Here is the parser.\n\nThat is all.");
    }

    #[test]
    fn offsets_follow_the_text_around_removed_blocks() {
        let text = "\n Intro.\n```artifact:python\nprint(1)\n```\n\n\nSee the docs for details.\n";
        let (message, map) = remove_markers_mapped(text);
        assert_eq!(message, "Intro.\n\nSee the docs for details.");

        let docs = text.find("docs").unwrap();
        let (start, end) = map.range(docs, docs + 4).unwrap();
        assert_eq!(&message[start..end], "docs");

        let intro = text.find("Intro").unwrap();
        assert_eq!(map.range(0, intro + 6), Some((0, 6)));

        let inside = text.find("print").unwrap();
        assert_eq!(map.range(inside, inside + 8), None);
        assert_eq!(map.range(text.len(), text.len() + 3), None);
    }

    #[test]
    fn bare_fence_inside_artifact_closes_it() {
        let text = "```artifact:markdown\nRun:\n```\n$ ls\n```\nafter";
        let artifacts = extract_artifacts(text);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].content, "Run:");
        assert_eq!(remove_markers(text), "$ ls\n```\nafter");
    }

    #[test]
    fn defaults_and_empty_blocks() {
        let text = "```artifact:\n  \n```\n```artifact:python\nprint(1)\n```";
        let artifacts = extract_artifacts(text);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].title, "Untitled Artifact");
        assert_eq!(artifacts[0].language, "python");
        assert_eq!(artifacts[0].artifact_type, ArtifactType::Code);
        assert_eq!(remove_markers(text), "");
    }

    #[test]
    fn unclosed_block_runs_to_end() {
        let artifacts = extract_artifacts("Intro\n```artifact:mermaid\ngraph TD\n");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].artifact_type, ArtifactType::Diagram);
        assert_eq!(artifacts[0].content, "graph TD");
        assert_eq!(visible_text("Intro\n```artifact:mermaid\ngraph TD\n"), "Intro\n");
    }

    #[test]
    fn ordinary_fences_are_kept() {
        let text = "Run:\n```sh\nls\n```\nok";
        assert!(extract_artifacts(text).is_empty());
        assert_eq!(remove_markers(text), text);
    }

    fn feed(detector: &mut ArtifactDetector, text: &mut String, delta: &str) -> Vec<DetectorAction> {
        text.push_str(delta);
        detector.update(text)
    }

    #[test]
    fn detector_suppresses_then_confirms_artifact() {
        let mut detector = ArtifactDetector::new();
        let mut text = String::new();

        assert_eq!(
            feed(&mut detector, &mut text, "Sure.\n"),
            vec![DetectorAction::Message("Sure.\n".into())]
        );
        assert!(feed(&mut detector, &mut text, "``").is_empty());
        assert_eq!(detector.state(), &DetectorState::Speculative);
        assert!(feed(&mut detector, &mut text, "`artifact:rust title=\"Main\"").is_empty());

        let actions = feed(&mut detector, &mut text, "\nfn main");
        assert_eq!(
            actions,
            vec![
                DetectorAction::Generating {
                    language: "rust".into(),
                    title: "Main".into()
                },
                DetectorAction::Chunk("fn main".into()),
            ]
        );
        assert!(matches!(detector.state(), DetectorState::Confirmed { .. }));

        assert_eq!(
            feed(&mut detector, &mut text, "() {}\n"),
            vec![DetectorAction::Chunk("fn main() {}\n".into())]
        );
        assert!(feed(&mut detector, &mut text, "```").is_empty());

        let actions = feed(&mut detector, &mut text, "\nDone");
        assert_eq!(actions, vec![DetectorAction::Message("Sure.\nDone".into())]);
        assert_eq!(detector.state(), &DetectorState::Normal);
    }

    #[test]
    fn detector_replays_ordinary_fence() {
        let mut detector = ArtifactDetector::new();
        let mut text = String::new();
        feed(&mut detector, &mut text, "Code:\n");
        assert!(feed(&mut detector, &mut text, "```py").is_empty());

        let actions = feed(&mut detector, &mut text, "thon\nprint()");
        assert_eq!(
            actions,
            vec![DetectorAction::Message("Code:\n```python\nprint()".into())]
        );
        assert_eq!(detector.state(), &DetectorState::Normal);
    }
}

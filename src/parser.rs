//! Turns one input line into pipeline stage descriptors.
//!
//! Grammar (no quoting, no expansion):
//!
//! ```text
//! stage1 [< infile] [> outfile] [| stage2 [< infile] [> outfile]] [&]
//! ```
//!
//! The parser itself accepts any number of `|`; capping the pipeline length is
//! left to the caller.

use crate::error::SyntaxError;
use regex::Regex;
use std::sync::LazyLock;

static INPUT_REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*(\S+)").expect("input redirection pattern"));
static OUTPUT_REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*(\S+)").expect("output redirection pattern"));
static ANY_REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[<>]\s*\S+").expect("redirection pattern"));

/// One pipeline stage: a command, its argv and optional file redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    /// The token used for executable resolution. Always equal to `args[0]`.
    pub command: String,
    /// The full argv. Never empty when built by the parser or [`Self::new`].
    pub args: Vec<String>,
    /// Target of the first `<` in the stage text.
    pub input_path: Option<String>,
    /// Target of the first `>` in the stage text.
    pub output_path: Option<String>,
    /// Set only on a stage built from the last segment of a line ending in `&`.
    pub background: bool,
}

impl StageDescriptor {
    /// Build a stage without redirections.
    ///
    /// Returns `None` for an empty argv, mirroring the parser which never
    /// constructs such a stage.
    pub fn new<I, S>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let command = args.first()?.clone();
        Some(Self {
            command,
            args,
            input_path: None,
            output_path: None,
            background: false,
        })
    }

    /// Arguments after the command token. Empty for a hand-built stage with
    /// no argv.
    pub fn arguments(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }
}

/// The stages produced from one line, in the order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLine {
    pub stages: Vec<StageDescriptor>,
}

impl ParsedLine {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether the interpreter should skip waiting for the final stage.
    pub fn is_background(&self) -> bool {
        self.stages.last().is_some_and(|stage| stage.background)
    }
}

/// Parse one line of input.
///
/// Segments that are empty once their redirections are removed contribute no
/// stage, so the result may be empty.
pub fn parse_line(line: &str) -> Result<ParsedLine, SyntaxError> {
    let segments: Vec<&str> = line.split('|').collect();
    let last = segments.len() - 1;
    let mut stages = Vec::with_capacity(segments.len());

    for (i, segment) in segments.into_iter().enumerate() {
        let mut text = segment.trim();
        let mut background = false;
        if let Some(stripped) = text.strip_suffix('&') {
            if i < last {
                return Err(SyntaxError::UnexpectedToken('|'));
            }
            background = true;
            text = stripped.trim();
        }
        if let Some(stage) = parse_segment(text, background) {
            stages.push(stage);
        }
    }

    tracing::trace!(?stages, "parsed line");
    Ok(ParsedLine { stages })
}

fn parse_segment(text: &str, background: bool) -> Option<StageDescriptor> {
    let input_path = first_target(&INPUT_REDIRECT, text);
    let output_path = first_target(&OUTPUT_REDIRECT, text);

    // every redirection is consumed, only the first of each kind is honored
    let remaining = ANY_REDIRECT.replace_all(text, "");
    let mut stage = StageDescriptor::new(remaining.split_whitespace())?;
    stage.input_path = input_path;
    stage.output_path = output_path;
    stage.background = background;
    Some(stage)
}

fn first_target(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|target| target.as_str().to_string())
}

//! Response Streamer
//!
//! Re-emits a finished answer as a lazy sequence of small chunks for a
//! typewriter effect. Pacing is purely presentational: concatenating the chunk
//! texts always reproduces the input exactly.
//!
//! Delays relative to the per-character delay `d`:
//!
//! | unit                      | delay  |
//! |---------------------------|--------|
//! | character                 | `d`    |
//! | newline inside paragraph  | `1.5d` |
//! | pause after a line        | `d`    |
//! | paragraph break (`\n\n`)  | `2.5d` |
//! | blank paragraph           | `2d`   |

use std::time::Duration;

use crate::config::StreamConfig;

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const LINE_SEPARATOR: &str = "\n";

/// One emitted unit; `text` may be empty for a pure pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamChunk<'a> {
    pub text: &'a str,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseStreamer {
    char_delay: Duration,
}

impl ResponseStreamer {
    pub fn new(char_delay: Duration) -> Self {
        Self { char_delay }
    }

    /// No pacing at all, for tests and non-interactive output
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        if config.enabled {
            Self::new(Duration::from_millis(config.char_delay_ms))
        } else {
            Self::instant()
        }
    }

    /// `d * num / den` in exact integer arithmetic
    fn scaled(&self, num: u32, den: u32) -> Duration {
        self.char_delay * num / den
    }

    /// Lazily split `text` into paced chunks; call again for a new text
    pub fn stream<'a>(&self, text: &'a str) -> impl Iterator<Item = StreamChunk<'a>> + Send + 'a {
        let streamer = *self;

        text.split(PARAGRAPH_SEPARATOR)
            .enumerate()
            .flat_map(move |(p_idx, paragraph)| {
                let separator = (p_idx > 0).then(|| StreamChunk {
                    text: PARAGRAPH_SEPARATOR,
                    delay: streamer.scaled(5, 2),
                });
                separator.into_iter().chain(streamer.paragraph_chunks(paragraph))
            })
    }

    fn paragraph_chunks<'a>(self, paragraph: &'a str) -> Box<dyn Iterator<Item = StreamChunk<'a>> + Send + 'a> {
        if paragraph.trim().is_empty() {
            return Box::new(std::iter::once(StreamChunk {
                text: paragraph,
                delay: self.scaled(2, 1),
            }));
        }

        let line_count = paragraph.split(LINE_SEPARATOR).count();
        Box::new(
            paragraph
                .split(LINE_SEPARATOR)
                .enumerate()
                .flat_map(move |(l_idx, line)| {
                    let chars = line.char_indices().map(move |(i, c)| StreamChunk {
                        text: &line[i..i + c.len_utf8()],
                        delay: self.char_delay,
                    });
                    let line_end = (l_idx + 1 < line_count)
                        .then(|| {
                            [
                                StreamChunk {
                                    text: "",
                                    delay: self.scaled(1, 1),
                                },
                                StreamChunk {
                                    text: LINE_SEPARATOR,
                                    delay: self.scaled(3, 2),
                                },
                            ]
                        })
                        .into_iter()
                        .flatten();
                    chars.chain(line_end)
                }),
        )
    }

    /// Drive the sequence, handing each chunk to `sink` and sleeping for its delay
    pub async fn play<F>(&self, text: &str, mut sink: F)
    where
        F: FnMut(&str),
    {
        for chunk in self.stream(text) {
            if !chunk.text.is_empty() {
                sink(chunk.text);
            }
            if !chunk.delay.is_zero() {
                tokio::time::sleep(chunk.delay).await;
            }
        }
    }
}

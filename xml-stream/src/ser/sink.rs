// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Destinations for the markup produced by a [`super::StreamWriter`].

use std::io::Write;

use super::Error;

/// One unit of output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Chunk {
    /// A markup fragment. Concatenating all fragments in order gives the document.
    Markup(String),

    /// End of the document; pushed exactly once, after all markup.
    End,
}

/// A sink's answer to a push.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Keep pushing.
    Continue,

    /// The chunk was accepted, but no more should be pushed until the owner
    /// of the sink calls [`super::StreamWriter::resume`].
    Pause,
}

/// Receives chunks from a [`super::StreamWriter`].
pub trait Sink {
    fn push(&mut self, chunk: Chunk) -> Result<Flow, Error>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn push(&mut self, chunk: Chunk) -> Result<Flow, Error> {
        (**self).push(chunk)
    }
}

/// Appends markup; never pauses.
impl Sink for String {
    fn push(&mut self, chunk: Chunk) -> Result<Flow, Error> {
        if let Chunk::Markup(m) = chunk {
            self.push_str(&m);
        }
        Ok(Flow::Continue)
    }
}

/// Collects fragments as pushed, optionally pausing once `high_water` of
/// them are buffered.
#[derive(Debug, Default)]
pub struct ChunkSink {
    chunks: Vec<String>,
    ended: bool,
    high_water: Option<usize>,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses the producer whenever `n` or more fragments are buffered.
    pub fn with_high_water(n: usize) -> Self {
        ChunkSink {
            high_water: Some(n),
            ..Self::default()
        }
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Takes the buffered fragments, making room for more.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.chunks)
    }

    /// True once the end sentinel has arrived.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn concat(&self) -> String {
        self.chunks.concat()
    }
}

impl Sink for ChunkSink {
    fn push(&mut self, chunk: Chunk) -> Result<Flow, Error> {
        match chunk {
            Chunk::Markup(m) => {
                if self.ended {
                    return Err(Error::sink("markup pushed after end of document"));
                }
                self.chunks.push(m);
            }
            Chunk::End => {
                if self.ended {
                    return Err(Error::sink("end of document pushed twice"));
                }
                self.ended = true;
            }
        }
        match self.high_water {
            Some(n) if self.chunks.len() >= n => Ok(Flow::Pause),
            _ => Ok(Flow::Continue),
        }
    }
}

/// Writes UTF-8 markup to any `Write` impl, flushing at the end.
pub struct IoSink<W: Write> {
    inner: W,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        IoSink { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for IoSink<W> {
    fn push(&mut self, chunk: Chunk) -> Result<Flow, Error> {
        match chunk {
            Chunk::Markup(m) => self.inner.write_all(m.as_bytes()),
            Chunk::End => self.inner.flush(),
        }
        .map_err(|e| Error::sink(e.to_string()))?;
        Ok(Flow::Continue)
    }
}

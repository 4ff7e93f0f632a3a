//! # Layer Trait
//!
//! Tower-style middleware composition for file handles.
//!
//! ## Overview
//!
//! The [`Layer`] trait lets a wrapper add behavior (caching, accounting,
//! tracing) to any [`VirtualFile`] without the backend knowing about it.
//!
//! ## How It Works
//!
//! ```text
//! Handle ──▶ Layer::layer() ──▶ Wrapped Handle
//! ```
//!
//! Each middleware provides:
//! 1. A wrapper struct that implements [`VirtualFile`]
//! 2. A `Layer` implementation that creates the wrapper
//!
//! The facade uses this to apply [`CacheLayer`](crate::CacheLayer) when the
//! configuration enables caching.
//!
//! ## Example
//!
//! ```rust
//! use routefs::{FsError, Layer, LayerExt, VirtualFile};
//! use std::io::SeekFrom;
//!
//! /// Counts bytes read through the handle.
//! struct Counting<F> {
//!     inner: F,
//!     read: u64,
//! }
//!
//! impl<F: VirtualFile> VirtualFile for Counting<F> {
//!     fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
//!         let n = self.inner.read(buf)?;
//!         self.read += n as u64;
//!         Ok(n)
//!     }
//!     fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> { self.inner.write(buf) }
//!     fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> { self.inner.seek(pos) }
//!     fn tell(&self) -> u64 { self.inner.tell() }
//!     fn eof(&self) -> bool { self.inner.eof() }
//! }
//!
//! struct CountingLayer;
//!
//! impl<F: VirtualFile> Layer<F> for CountingLayer {
//!     type File = Counting<F>;
//!
//!     fn layer(self, file: F) -> Self::File {
//!         Counting { inner: file, read: 0 }
//!     }
//! }
//!
//! fn wrap(file: Box<dyn VirtualFile>) -> Counting<Box<dyn VirtualFile>> {
//!     file.layer(CountingLayer)
//! }
//! ```

use crate::VirtualFile;

/// A layer that wraps a file handle to add functionality.
///
/// Inspired by Tower's `Layer` trait.
///
/// # Design Notes
///
/// - `layer(self, file)` consumes both the layer and the handle
/// - The resulting `File` type should implement [`VirtualFile`] and forward
///   lifecycle calls (`flush`, `close`) to the wrapped handle
pub trait Layer<F> {
    /// The resulting handle type after applying this layer.
    type File;

    /// Wrap the given handle with this layer's functionality.
    fn layer(self, file: F) -> Self::File;
}

/// Extension trait for fluent layer composition.
///
/// Provides `.layer()` on any handle.
pub trait LayerExt: VirtualFile + Sized {
    /// Apply a layer to this handle.
    fn layer<L: Layer<Self>>(self, layer: L) -> L::File {
        layer.layer(self)
    }
}

impl<F: VirtualFile + Sized> LayerExt for F {}

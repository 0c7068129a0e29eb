//! Public storage interface
//!
//! The `StorageFacade` ties together:
//! - `PathResolver` (where things go)
//! - `Dispatcher` (inline or background execution)
//! - the blocking primitives in `io`, `eraser` and `sampler`
//!
//! ## Usage
//!
//! ```text
//! let facade = StorageFacade::load()?;
//! let target = facade.target(StorageCategory::Documents, None, "todo.json")?;
//!
//! // Await the outcome...
//! facade.write_json_object(&target, doc, DispatchMode::Background).await?;
//!
//! // ...or hand it a pair of callbacks
//! facade
//!     .read_json_object(&target, DispatchMode::Background)
//!     .deliver(|doc| show(doc), |msg| report(msg));
//! ```
//!
//! A facade is normally constructed once and passed to its consumers. For
//! hosts that want a single shared instance, [`StorageFacade::install`] sets
//! one process-wide; the first installation wins.

use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::Config;
use crate::dispatch::{Completion, DispatchMode, Dispatcher};
use crate::eraser;
use crate::error::{StorageError, StorageResult};
use crate::io;
use crate::paths::{PathResolver, StorageCategory, StorageTarget};
use crate::platform::{DensityProbe, FixedDensity, FsMountProbe, MountProbe};
use crate::sampler::{
    self, DecodeBudget, ImageCodec, ImageEncoding, ImageSource, RasterCodec, RasterImage,
};
use crate::stats::StorageStats;

static GLOBAL_FACADE: OnceLock<StorageFacade> = OnceLock::new();

/// Uniform persistence of text, JSON and images
pub struct StorageFacade {
    config: Config,
    resolver: PathResolver,
    dispatcher: Dispatcher,
    codec: Arc<dyn RasterCodec>,
    density: Arc<dyn DensityProbe>,
}

impl StorageFacade {
    /// Create a facade whose background work and callbacks run on `runtime`
    pub fn new(config: Config, runtime: Handle) -> Self {
        let dispatcher = Dispatcher::new(runtime, config.max_concurrent_operations);
        Self::with_dispatcher(config, dispatcher)
    }

    /// Create a facade bound to the runtime this is called from
    pub fn from_current(config: Config) -> StorageResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        Ok(Self::new(config, runtime))
    }

    /// Load configuration from file and environment, then bind to the current runtime
    pub fn load() -> StorageResult<Self> {
        let config = Config::load().map_err(|e| StorageError::Config(format!("{:#}", e)))?;
        Self::from_current(config)
    }

    /// Create a facade that can only run operations inline
    pub fn inline(config: Config) -> Self {
        Self::with_dispatcher(config, Dispatcher::inline_only())
    }

    fn with_dispatcher(config: Config, dispatcher: Dispatcher) -> Self {
        let resolver = PathResolver::new(&config, Arc::new(FsMountProbe));
        let density = Arc::new(FixedDensity(config.device_density));
        Self {
            config,
            resolver,
            dispatcher,
            codec: Arc::new(ImageCodec),
            density,
        }
    }

    /// Replace the mount probe used to decide between external and internal storage
    pub fn with_mount_probe(mut self, probe: Arc<dyn MountProbe>) -> Self {
        self.resolver = PathResolver::new(&self.config, probe);
        self
    }

    /// Replace the display density source
    pub fn with_density_probe(mut self, probe: Arc<dyn DensityProbe>) -> Self {
        self.density = probe;
        self
    }

    /// Replace the raster codec
    pub fn with_codec(mut self, codec: Arc<dyn RasterCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Install this facade as the process-wide instance
    ///
    /// Fails with `AlreadyInstalled` if one was installed before; the
    /// existing instance is left untouched.
    pub fn install(self) -> StorageResult<&'static StorageFacade> {
        GLOBAL_FACADE
            .set(self)
            .map_err(|_| StorageError::AlreadyInstalled)?;
        GLOBAL_FACADE.get().ok_or(StorageError::AlreadyInstalled)
    }

    /// The process-wide instance, if one was installed
    pub fn global() -> Option<&'static StorageFacade> {
        GLOBAL_FACADE.get()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ==================== Paths ====================

    /// Resolve (and create) a category directory; mount state is re-queried
    pub fn resolve_root(
        &self,
        category: StorageCategory,
        sub_path: Option<&str>,
    ) -> StorageResult<StorageTarget> {
        self.resolver.resolve_root(category, sub_path)
    }

    /// Resolve a file target inside a category directory
    pub fn target(
        &self,
        category: StorageCategory,
        sub_path: Option<&str>,
        file_name: &str,
    ) -> StorageResult<StorageTarget> {
        self.resolver.target(category, sub_path, file_name)
    }

    /// Check whether a target exists
    pub fn exists(&self, target: &StorageTarget) -> bool {
        target.path().exists()
    }

    // ==================== Text ====================

    /// Replace the target's content with `content`
    pub fn write_text(
        &self,
        target: &StorageTarget,
        content: impl Into<String>,
        mode: DispatchMode,
    ) -> Completion<()> {
        let target = target.clone();
        let content = content.into();
        self.run(mode, "write_text", move || io::write_text(target.path(), &content))
    }

    /// Read the target as text, lines concatenated without terminators
    pub fn read_text(&self, target: &StorageTarget, mode: DispatchMode) -> Completion<String> {
        let target = target.clone();
        self.run(mode, "read_text", move || io::read_text(target.path()))
    }

    // ==================== JSON ====================

    pub fn write_json_object(
        &self,
        target: &StorageTarget,
        document: Map<String, Value>,
        mode: DispatchMode,
    ) -> Completion<()> {
        let target = target.clone();
        self.run(mode, "write_json_object", move || {
            io::write_json_object(target.path(), &document)
        })
    }

    pub fn write_json_array(
        &self,
        target: &StorageTarget,
        document: Vec<Value>,
        mode: DispatchMode,
    ) -> Completion<()> {
        let target = target.clone();
        self.run(mode, "write_json_array", move || {
            io::write_json_array(target.path(), &document)
        })
    }

    /// Read a JSON object; an array (or scalar) is a `ShapeMismatch`
    pub fn read_json_object(
        &self,
        target: &StorageTarget,
        mode: DispatchMode,
    ) -> Completion<Map<String, Value>> {
        let target = target.clone();
        self.run(mode, "read_json_object", move || {
            io::read_json_object(target.path())
        })
    }

    /// Read a JSON array; an object (or scalar) is a `ShapeMismatch`
    pub fn read_json_array(
        &self,
        target: &StorageTarget,
        mode: DispatchMode,
    ) -> Completion<Vec<Value>> {
        let target = target.clone();
        self.run(mode, "read_json_array", move || io::read_json_array(target.path()))
    }

    // ==================== Images ====================

    /// Encode and write an image
    ///
    /// `.jpg` targets are saved as JPEG at the configured quality, anything
    /// else as PNG.
    pub fn save_image(
        &self,
        target: &StorageTarget,
        image: RasterImage,
        mode: DispatchMode,
    ) -> Completion<()> {
        let target = target.clone();
        let codec = self.codec.clone();
        let quality = self.config.jpeg_quality;
        self.run(mode, "save_image", move || {
            let encoding = ImageEncoding::for_target(&target);
            let bytes = codec.encode(&image, encoding, quality)?;
            io::write_bytes(target.path(), &bytes)
        })
    }

    /// Decode an image file at full resolution
    pub fn load_image(
        &self,
        target: &StorageTarget,
        mode: DispatchMode,
    ) -> Completion<RasterImage> {
        let source = ImageSource::from(target);
        let codec = self.codec.clone();
        let density = self.density.density();
        self.run(mode, "load_image", move || {
            sampler::decode_full(codec.as_ref(), &source, density)
        })
    }

    /// Decode an image file, downsampled to roughly fit `budget`
    pub fn load_image_sampled(
        &self,
        target: &StorageTarget,
        budget: DecodeBudget,
        mode: DispatchMode,
    ) -> Completion<RasterImage> {
        self.load_sampled(ImageSource::from(target), budget, mode)
    }

    /// Decode an image compiled into the binary, downsampled to roughly fit `budget`
    pub fn load_embedded_image(
        &self,
        bytes: &'static [u8],
        budget: DecodeBudget,
        mode: DispatchMode,
    ) -> Completion<RasterImage> {
        self.load_sampled(ImageSource::Embedded(bytes), budget, mode)
    }

    fn load_sampled(
        &self,
        source: ImageSource,
        budget: DecodeBudget,
        mode: DispatchMode,
    ) -> Completion<RasterImage> {
        let codec = self.codec.clone();
        let density = self.density.density();
        self.run(mode, "load_image_sampled", move || {
            sampler::decode_sampled(codec.as_ref(), &source, budget, density)
        })
    }

    // ==================== Housekeeping ====================

    /// Remove everything inside a directory, keeping the directory
    pub fn clear_directory(&self, directory: &StorageTarget, mode: DispatchMode) -> Completion<()> {
        let directory = directory.clone();
        self.run(mode, "clear_directory", move || {
            eraser::erase_contents(directory.path())
        })
    }

    /// Delete a single file
    pub fn delete_file(&self, target: &StorageTarget, mode: DispatchMode) -> Completion<()> {
        let target = target.clone();
        self.run(mode, "delete_file", move || io::delete_file(target.path()))
    }

    /// File count and size of a category on whichever root is active now
    pub fn category_stats(
        &self,
        category: StorageCategory,
        mode: DispatchMode,
    ) -> Completion<StorageStats> {
        let resolver = self.resolver.clone();
        self.run(mode, "category_stats", move || {
            let root = resolver.resolve_root(category, None)?;
            StorageStats::collect(root.path())
        })
    }

    fn run<T, F>(&self, mode: DispatchMode, operation: &'static str, op: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        debug!("Dispatching {} ({:?})", operation, mode);
        self.dispatcher.dispatch(mode, op)
    }
}

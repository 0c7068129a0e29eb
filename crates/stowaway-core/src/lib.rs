//! Stowaway Core Library
//!
//! A storage facade for applications that persist text, JSON documents and
//! images, preferring removable storage and falling back to an app-private
//! root when it is missing or read-only.
//!
//! # Architecture
//!
//! - **Paths**: every operation resolves its root at call time, so a medium
//!   that goes away mid-session is picked up by the next call
//! - **Writes**: replace content through a temporary sibling and a rename;
//!   readers never observe a half-written file
//! - **Dispatch**: operations run inline or on the runtime's blocking pool,
//!   reporting exactly one outcome either way
//!
//! # Quick Start
//!
//! ```text
//! let facade = StorageFacade::from_current(Config::load()?)?;
//!
//! let target = facade.target(StorageCategory::Documents, None, "notes.txt")?;
//! facade.write_text(&target, "hello", DispatchMode::Background).await?;
//!
//! let photo = facade.target(StorageCategory::Pictures, Some("album"), "cover.jpg")?;
//! let thumb = facade
//!     .load_image_sampled(&photo, DecodeBudget::new(128, 128), DispatchMode::Background)
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - `facade`: Unified storage interface (main entry point)
//! - `paths`: Category roots and external/internal fallback
//! - `io`: Blocking text and JSON primitives
//! - `eraser`: Recursive directory clearing
//! - `sampler`: Two-pass image downsampling
//! - `dispatch`: Inline and background execution
//! - `config`: Facade configuration

pub mod config;
pub mod dispatch;
pub mod eraser;
pub mod error;
pub mod facade;
pub mod io;
pub mod paths;
pub mod platform;
pub mod sampler;
pub mod stats;

pub use config::Config;
pub use dispatch::{Completion, DispatchMode, Dispatcher};
pub use error::{StorageError, StorageResult};
pub use facade::StorageFacade;
pub use io::JsonShape;
pub use paths::{PathResolver, RootKind, StorageCategory, StorageTarget};
pub use platform::{
    DensityProbe, FixedDensity, FixedMountState, FsMountProbe, MountProbe, MountState,
};
pub use sampler::{
    compute_sample_factor, DecodeBudget, ImageCodec, ImageEncoding, ImageSource, RasterCodec,
    RasterImage, SampledDecodeParams,
};
pub use stats::StorageStats;

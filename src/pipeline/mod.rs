//! Batch pipeline: page range → render → normalize → infer → score.
//!
//! # Example
//!
//! ```no_run
//! use docvl::document::DocumentLoader;
//! use docvl::inference::{ChatCompletionsBackend, ChatCompletionsConfig, InferenceGateway};
//! use docvl::pipeline::{BatchOrchestrator, NoProgress, PipelineOptions};
//!
//! fn main() -> docvl::Result<()> {
//!     let loader = DocumentLoader::new();
//!     let document = loader.open("scan.pdf")?;
//!
//!     let backend = ChatCompletionsBackend::new(ChatCompletionsConfig::default());
//!     let mut gateway = InferenceGateway::open_with(Box::new(backend))?;
//!
//!     let options = PipelineOptions::new().with_pages(0, Some(5));
//!     let records =
//!         BatchOrchestrator::new(&mut gateway, options).run(&document, &mut NoProgress)?;
//!
//!     for record in &records {
//!         println!("page {}: {:?}", record.page_number, record.text());
//!     }
//!     Ok(())
//! }
//! ```

mod extract;
mod options;
mod orchestrator;
mod progress;
mod record;

pub use extract::{extract_image, ImageExtraction};
pub use options::{ExtractOptions, PipelineOptions, DEFAULT_RELEASE_EVERY};
pub use orchestrator::BatchOrchestrator;
pub use progress::{Checkpoint, NoProgress, ProgressObserver};
pub use record::{FailureStage, PageOutcome, PageRecord};

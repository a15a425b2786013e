//! Sequential page-by-page batch driver.

use std::time::Instant;

use crate::document::DocumentSource;
use crate::error::{Error, Result};
use crate::inference::{InferenceGateway, PROMPT_MARKER};
use crate::metrics::{score, GroundTruth};
use crate::normalize::normalize;

use super::options::PipelineOptions;
use super::progress::{Checkpoint, ProgressObserver};
use super::record::{FailureStage, PageRecord};

/// Drives render → normalize → infer → score over a page range.
///
/// Pages are processed one at a time, in order, with exactly one inference
/// call in flight. A page that fails to render or transcribe becomes a failed
/// [`PageRecord`] and the run moves on; only invalid options abort the run,
/// and they do so before any page is touched.
pub struct BatchOrchestrator<'a> {
    gateway: &'a mut InferenceGateway,
    options: PipelineOptions,
    ground_truth: Option<&'a GroundTruth>,
}

impl<'a> BatchOrchestrator<'a> {
    /// Create an orchestrator over an opened gateway.
    pub fn new(gateway: &'a mut InferenceGateway, options: PipelineOptions) -> Self {
        Self {
            gateway,
            options,
            ground_truth: None,
        }
    }

    /// Score pages against a reference transcription.
    pub fn with_ground_truth(mut self, ground_truth: &'a GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Options this orchestrator runs with.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Process the configured page range of `document`.
    ///
    /// Returns one record per requested page, in page order.
    pub fn run(
        &mut self,
        document: &dyn DocumentSource,
        observer: &mut dyn ProgressObserver,
    ) -> Result<Vec<PageRecord>> {
        self.options.validate()?;
        let range = self.options.page_range(document.page_count());
        let total = range.end - range.start;

        log::info!(
            "Processing {} page(s) of '{}' ({}..{}, {} DPI)",
            total,
            document.label(),
            range.start + 1,
            range.end,
            self.options.dpi
        );
        observer.run_started(total);

        let started = Instant::now();
        let mut records = Vec::with_capacity(total as usize);
        let mut latency_sum = 0.0;
        let mut succeeded = 0u32;

        for index in range.clone() {
            let page_number = index + 1;

            if let Some(deadline) = self.options.deadline {
                if started.elapsed() >= deadline {
                    log::warn!(
                        "Deadline of {:.1}s exceeded before page {}; skipping {} page(s)",
                        deadline.as_secs_f64(),
                        page_number,
                        range.end - index
                    );
                    for skipped in index..range.end {
                        let record = PageRecord::failure(
                            skipped + 1,
                            FailureStage::Deadline,
                            "deadline exceeded",
                        );
                        observer.page_finished(&record);
                        records.push(record);
                    }
                    break;
                }
            }

            let record = self.process_page(document, index);
            if let Some(latency) = record.latency_seconds() {
                latency_sum += latency;
                succeeded += 1;
            }
            observer.page_finished(&record);
            records.push(record);

            let processed = index - range.start + 1;
            if processed % self.options.release_every == 0 {
                self.gateway.release_memory();

                let mean_latency = if succeeded > 0 {
                    latency_sum / f64::from(succeeded)
                } else {
                    0.0
                };
                let checkpoint = Checkpoint::new(processed, total, mean_latency);
                log::info!(
                    "Progress: {}/{} pages, ETA {:.1} min",
                    processed,
                    total,
                    checkpoint.eta.as_secs_f64() / 60.0
                );
                observer.checkpoint(&checkpoint);
            }
        }

        log::info!(
            "Finished '{}': {} succeeded, {} failed in {:.1}s",
            document.label(),
            succeeded,
            records.len() as u32 - succeeded,
            started.elapsed().as_secs_f64()
        );
        observer.run_finished(&records);
        Ok(records)
    }

    fn process_page(&mut self, document: &dyn DocumentSource, index: u32) -> PageRecord {
        let page_number = index + 1;

        let rendered = match document.render_page(index, self.options.dpi) {
            Ok(image) => image,
            Err(e) => {
                log_page_error(page_number, &e);
                return PageRecord::failure(page_number, FailureStage::Render, e.to_string());
            }
        };

        let normalized = normalize(rendered, self.options.max_edge);

        let result = match self
            .gateway
            .infer(&normalized.image, PROMPT_MARKER, self.options.max_tokens)
        {
            Ok(result) => result,
            Err(e) => {
                log_page_error(page_number, &e);
                return PageRecord::failure(page_number, FailureStage::Inference, e.to_string());
            }
        };

        log::debug!(
            "Page {}: {} chars, {} tokens, {:.2}s",
            page_number,
            result.extracted_text.chars().count(),
            result.token_count,
            result.latency_seconds
        );

        let reference = self.ground_truth.and_then(|truth| truth.page(index));
        let metrics = reference.map(|reference| score(reference, &result.extracted_text));

        let record = PageRecord::success(page_number, result);
        match metrics {
            Some(metrics) => record.with_quality(metrics),
            None => record,
        }
    }
}

fn log_page_error(page_number: u32, error: &Error) {
    if error.is_page_level() {
        log::warn!("Error on page {}: {}", page_number, error);
    } else {
        log::error!("Unexpected error on page {}: {}", page_number, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BackendOutput, InferenceBackend};
    use crate::document::ImageSet;
    use crate::pipeline::NoProgress;
    use image::DynamicImage;

    struct Blank {
        pages: u32,
        broken: Option<u32>,
    }

    impl DocumentSource for Blank {
        fn label(&self) -> &str {
            "blank"
        }

        fn page_count(&self) -> u32 {
            self.pages
        }

        fn render_page(&self, index: u32, _dpi: u32) -> Result<DynamicImage> {
            if Some(index) == self.broken {
                return Err(Error::render(index + 1, "broken page"));
            }
            Ok(DynamicImage::new_luma8(20, 10))
        }
    }

    struct Fixed;

    impl InferenceBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn generate(
            &mut self,
            _image: &DynamicImage,
            _prompt: &str,
            _max_tokens: u32,
        ) -> Result<BackendOutput> {
            Ok(BackendOutput {
                decoded: "text".into(),
                prompt_tokens: 1,
                sequence_tokens: 3,
                generation_time: Some(std::time::Duration::from_secs(1)),
            })
        }
    }

    fn gateway() -> InferenceGateway {
        InferenceGateway::open_with(Box::new(Fixed)).unwrap()
    }

    #[test]
    fn test_render_failure_is_isolated() {
        let mut gateway = gateway();
        let doc = Blank {
            pages: 3,
            broken: Some(1),
        };

        let records = BatchOrchestrator::new(&mut gateway, PipelineOptions::default())
            .run(&doc, &mut NoProgress)
            .unwrap();

        assert_eq!(records.len(), 3);
        assert!(records[0].is_success());
        assert_eq!(records[1].failure_stage(), Some(FailureStage::Render));
        assert!(records[2].is_success());
        assert_eq!(records[2].token_count(), Some(2));
    }

    #[test]
    fn test_invalid_options_fail_before_pages() {
        let mut gateway = gateway();
        let doc = Blank {
            pages: 3,
            broken: None,
        };

        let result = BatchOrchestrator::new(&mut gateway, PipelineOptions::new().with_dpi(0))
            .run(&doc, &mut NoProgress);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result =
            BatchOrchestrator::new(&mut gateway, PipelineOptions::new().with_pages(0, Some(0)))
                .run(&doc, &mut NoProgress);
        assert!(matches!(result, Err(Error::InvalidPageRange(_))));
    }

    #[test]
    fn test_start_past_end_yields_no_records() {
        let mut gateway = gateway();
        let doc = Blank {
            pages: 3,
            broken: None,
        };

        let records =
            BatchOrchestrator::new(&mut gateway, PipelineOptions::new().with_pages(3, None))
                .run(&doc, &mut NoProgress)
                .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_empty_image_set_yields_no_records() {
        let mut gateway = gateway();
        let records = BatchOrchestrator::new(&mut gateway, PipelineOptions::default())
            .run(&ImageSet::new("empty"), &mut NoProgress)
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_page_numbers_follow_range() {
        let mut gateway = gateway();
        let doc = Blank {
            pages: 10,
            broken: None,
        };

        let records =
            BatchOrchestrator::new(&mut gateway, PipelineOptions::new().with_pages(4, Some(3)))
                .run(&doc, &mut NoProgress)
                .unwrap();

        let numbers: Vec<u32> = records.iter().map(|r| r.page_number).collect();
        assert_eq!(numbers, vec![5, 6, 7]);
    }

    #[test]
    fn test_closed_gateway_fails_every_page() {
        let mut gateway = InferenceGateway::new(Box::new(Fixed));
        let doc = Blank {
            pages: 2,
            broken: None,
        };

        let records = BatchOrchestrator::new(&mut gateway, PipelineOptions::default())
            .run(&doc, &mut NoProgress)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.failure_stage() == Some(FailureStage::Inference)));
    }
}

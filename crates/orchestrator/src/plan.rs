//! Turns a lane assignment into dispatchable batches.

use cloudhaul_planner::{
    Batch, CompressOptions, CompressionPlan, ConversionPlan, FileEntry, Lane, LaneAssignment,
    MediaFormat, Options, PlannerError, Tooling, average_file_size, batches, compress, convert,
    default_target, order_by_priority,
};

use crate::config::BatchingConfig;

/// One batch plus everything the engine needs to process it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchWork {
    pub batch: Batch,
    /// Executor capability required, for convert batches.
    pub tooling: Option<Tooling>,
    pub conversions: Vec<ConversionPlan>,
    pub compressions: Vec<CompressionPlan>,
    /// Bytes this batch is expected to write at the destination.
    pub estimated_bytes: u64,
}

impl BatchWork {
    fn plain(batch: Batch) -> Self {
        let estimated_bytes = match batch.lane {
            Lane::Ghost => 0,
            _ => batch.total_bytes,
        };
        Self {
            batch,
            tooling: None,
            conversions: Vec::new(),
            compressions: Vec::new(),
            estimated_bytes,
        }
    }
}

fn plan_conversion(file: &FileEntry, options: &Options) -> Result<ConversionPlan, PlannerError> {
    let target = MediaFormat::from_extension(file.extension())
        .and_then(default_target)
        .ok_or_else(|| PlannerError::UnsupportedConversion {
            from: file.extension().to_string(),
            to: "any".into(),
        })?;
    convert(file, target, options)
}

/// Plans every lane in dispatch order.
///
/// Convert batches never mix executors: files are ordered by priority, then
/// split by the tooling they need, ffmpeg first.
pub fn plan_work(
    lanes: &LaneAssignment,
    batching: &BatchingConfig,
    conversion_options: &Options,
    compression: &CompressOptions,
) -> Result<Vec<BatchWork>, PlannerError> {
    let sizer = batching.sizer();
    let mut work = Vec::new();

    for (lane, files) in lanes.iter() {
        let size = sizer.batch_size(average_file_size(files), batching.available_memory);
        match lane {
            Lane::Express | Lane::Ghost => {
                work.extend(batches(lane, files, size).into_iter().map(BatchWork::plain));
            }
            Lane::Compress => {
                for batch in batches(lane, files, size) {
                    let compressions = batch
                        .files
                        .iter()
                        .map(|f| compress(f, compression))
                        .collect::<Result<Vec<_>, _>>()?;
                    work.push(BatchWork {
                        estimated_bytes: compressions.iter().map(|p| p.estimated_size).sum(),
                        compressions,
                        ..BatchWork::plain(batch)
                    });
                }
            }
            Lane::Convert => {
                let mut ordered = files.to_vec();
                order_by_priority(&mut ordered);
                let plans = ordered
                    .iter()
                    .map(|f| plan_conversion(f, conversion_options))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut index = 0;
                for tooling in [Tooling::Ffmpeg, Tooling::ImageMagick] {
                    let (group, group_plans): (Vec<FileEntry>, Vec<ConversionPlan>) = ordered
                        .iter()
                        .zip(&plans)
                        .filter(|(_, plan)| plan.tooling == tooling)
                        .map(|(f, plan)| (f.clone(), plan.clone()))
                        .unzip();

                    for (mut batch, chunk) in batches(lane, &group, size)
                        .into_iter()
                        .zip(group_plans.chunks(size.max(1)))
                    {
                        batch.index = index;
                        index += 1;
                        work.push(BatchWork {
                            tooling: Some(tooling),
                            estimated_bytes: chunk.iter().map(|p| p.estimated_size).sum(),
                            conversions: chunk.to_vec(),
                            ..BatchWork::plain(batch)
                        });
                    }
                }
            }
        }
    }
    Ok(work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhaul_planner::{ActionTag, CompressionAlgorithm, assign};

    fn entry(path: &str, size: u64, action: ActionTag) -> FileEntry {
        FileEntry::new(path, size, action)
    }

    fn plan(files: Vec<FileEntry>, batching: &BatchingConfig) -> Vec<BatchWork> {
        plan_work(
            &assign(files),
            batching,
            &Options::new(),
            &CompressOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn lanes_follow_dispatch_order() {
        let work = plan(
            vec![
                entry("vm.img", 50, ActionTag::Link),
                entry("app.log", 100, ActionTag::Compress),
                entry("take.wav", 100, ActionTag::Convert),
                entry("a.bin", 100, ActionTag::Transfer),
            ],
            &BatchingConfig::default(),
        );
        let lanes: Vec<Lane> = work.iter().map(|w| w.batch.lane).collect();
        assert_eq!(
            lanes,
            [Lane::Express, Lane::Convert, Lane::Compress, Lane::Ghost]
        );
    }

    #[test]
    fn estimates_follow_lane() {
        let work = plan(
            vec![
                entry("a.bin", 100, ActionTag::Transfer),
                entry("take.wav", 1000, ActionTag::Convert),
                entry("app.log", 1000, ActionTag::Compress),
                entry("vm.img", 5000, ActionTag::Link),
            ],
            &BatchingConfig::default(),
        );
        let estimates: Vec<u64> = work.iter().map(|w| w.estimated_bytes).collect();
        assert_eq!(estimates, [100, 550, 300, 0]);
        assert_eq!(work[2].compressions[0].algorithm, CompressionAlgorithm::Zstd);
    }

    #[test]
    fn convert_batches_do_not_mix_tooling() {
        let batching = BatchingConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let work = plan(
            vec![
                entry("scan.tif", 10, ActionTag::Convert),
                entry("a.wav", 10, ActionTag::Convert),
                entry("clip.avi", 10, ActionTag::Convert),
                entry("b.aiff", 10, ActionTag::Convert),
                entry("pic.bmp", 10, ActionTag::Convert),
            ],
            &batching,
        );

        assert_eq!(work.len(), 3);
        assert_eq!(work[0].tooling, Some(Tooling::Ffmpeg));
        // Audio outranks video within the ffmpeg group.
        assert_eq!(work[0].batch.files[0].path(), "a.wav");
        assert_eq!(work[0].batch.files[1].path(), "b.aiff");
        assert_eq!(work[1].batch.files[0].path(), "clip.avi");
        assert_eq!(work[2].tooling, Some(Tooling::ImageMagick));
        assert_eq!(work[2].batch.files.len(), 2);

        let indexes: Vec<usize> = work.iter().map(|w| w.batch.index).collect();
        assert_eq!(indexes, [0, 1, 2]);
        for w in &work {
            assert_eq!(w.conversions.len(), w.batch.files.len());
        }
    }

    #[test]
    fn invalid_compression_level_fails_planning() {
        let err = plan_work(
            &assign(vec![entry("a.txt", 1, ActionTag::Compress)]),
            &BatchingConfig::default(),
            &Options::new(),
            &CompressOptions {
                level: Some(99),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidCompressionLevel { .. }));
    }

    #[test]
    fn memory_budget_bounds_batches() {
        let batching = BatchingConfig {
            available_memory: 1000,
            ..Default::default()
        };
        let files = (0..10)
            .map(|i| entry(&format!("f{i}.bin"), 100, ActionTag::Transfer))
            .collect();
        let work = plan(files, &batching);
        // 1000 / (100 × 2) = 5 files per batch.
        assert_eq!(work.len(), 2);
        assert!(work.iter().all(|w| w.batch.files.len() == 5));
    }
}

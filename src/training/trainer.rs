use std::sync::Arc;

use candle_core::{DType, Device};
use tracing::{debug, info};

use super::gradients::{clip_grad_norm, GradientAccumulator};
use super::optimizer::{GroupedAdamW, ParamGroups};
use super::precision::{ensure_mixed_precision, LossScaler};
use super::schedule::WarmupLinearSchedule;
use crate::config::FineTuneConfig;
use crate::engine::Transformer;
use crate::error::{ClassifierError, Result};
use crate::gpu::{select_device, GradientSync, LocalSync, ParallelMode};
use crate::metrics::{TrainingMetricsCollector, TrainingReport};
use crate::processing::{DataLoader, Processor};
use crate::types::TextDataset;

// Micro-batches between progress lines
const LOG_EVERY: usize = 10;

/// Runs the fine-tuning loop for one model and one hyperparameter set
pub struct Trainer<'a> {
    config: &'a FineTuneConfig,
}

/// Everything resolved before the first batch is drawn
struct TrainingPlan {
    device: Device,
    mode: ParallelMode,
    sync: Arc<dyn GradientSync>,
    seed: u64,
    train_batch_size: usize,
}

impl<'a> Trainer<'a> {
    pub fn new(config: &'a FineTuneConfig) -> Self {
        Self { config }
    }

    /// Fine-tune `model` in place on a labelled dataset.
    ///
    /// Parameters and optimizer state stay in f32. Half-precision runs do
    /// forward and backward through a cast copy of the model that is rebuilt
    /// after every optimizer step.
    pub fn train(&self, model: &mut Transformer, dataset: &TextDataset) -> Result<TrainingReport> {
        let plan = self.plan(model, dataset)?;
        model.to_device(&plan.device, DType::F32)?;
        self.run(model, dataset, &plan)
    }

    fn plan(&self, model: &Transformer, dataset: &TextDataset) -> Result<TrainingPlan> {
        let config = self.config;
        config.validate()?;

        if dataset.is_empty() {
            return Err(ClassifierError::invalid_argument(
                "dataset",
                "Cannot fine-tune on an empty dataset",
            ));
        }
        if !dataset.has_labels() {
            return Err(ClassifierError::invalid_argument(
                "dataset",
                "Fine-tuning requires labelled examples",
            ));
        }

        let num_labels = model.num_labels();
        if let Some(label) = dataset
            .iter()
            .filter_map(|example| example.label)
            .find(|&label| label as usize >= num_labels)
        {
            return Err(ClassifierError::invalid_argument(
                "labels",
                format!(
                    "Label {} is out of range for a model with {} labels",
                    label, num_labels
                ),
            ));
        }

        let (device, num_gpus) = select_device(config.num_gpus, config.local_rank)?;
        let mode = ParallelMode::resolve(num_gpus, config.local_rank, config.world_size);

        let sync: Arc<dyn GradientSync> = if mode.world_size() > 1 {
            let sync = model.gradient_sync().ok_or_else(|| {
                ClassifierError::invalid_argument(
                    "world_size",
                    format!(
                        "Distributed training over {} processes needs a gradient sync; \
                         register one with with_gradient_sync()",
                        mode.world_size()
                    ),
                )
            })?;
            if sync.world_size() != mode.world_size() {
                return Err(ClassifierError::invalid_argument(
                    "world_size",
                    format!(
                        "Gradient sync spans {} processes, configuration expects {}",
                        sync.world_size(),
                        mode.world_size()
                    ),
                ));
            }
            sync
        } else {
            Arc::new(LocalSync)
        };

        ensure_mixed_precision(config.precision, &device)?;

        let seed = match config.seed {
            Some(seed) => {
                // the CPU backend draws from the thread rng and cannot be seeded
                if device.is_cuda() {
                    device.set_seed(seed)?;
                }
                seed
            }
            // ranks must agree on the permutation they shard
            None if mode.world_size() > 1 => 0,
            None => rand::random(),
        };

        Ok(TrainingPlan {
            device,
            mode,
            sync,
            seed,
            train_batch_size: config.batch_size * mode.batch_multiplier(),
        })
    }

    fn run(&self, model: &Transformer, dataset: &TextDataset, plan: &TrainingPlan) -> Result<TrainingReport> {
        let config = self.config;
        let accumulation = config.gradient_accumulation_steps;
        let report_progress = config.verbose && plan.mode.is_primary();

        let loader = DataLoader::new(
            dataset,
            plan.mode.train_sampler(plan.seed),
            plan.train_batch_size,
            plan.device.clone(),
        )?;
        let num_batches = loader.len();
        let steps_per_epoch = num_batches.div_ceil(accumulation);
        let (total_steps, num_epochs) = match config.max_steps {
            Some(max_steps) => (max_steps, max_steps.div_ceil(steps_per_epoch)),
            None => (steps_per_epoch * config.num_epochs, config.num_epochs),
        };

        let groups = ParamGroups::from_varmap(model.varmap());
        let vars = groups.vars();
        let mut optimizer = GroupedAdamW::new(
            &groups,
            config.learning_rate,
            config.adam_epsilon,
            config.weight_decay,
        )?;
        let mut schedule = WarmupLinearSchedule::new(config.learning_rate, config.warmup_steps, total_steps);
        let mut scaler = config.precision.is_mixed().then(LossScaler::default);
        let mut half_model = if config.precision.is_mixed() {
            Some(model.cast_model(config.precision.dtype())?)
        } else {
            None
        };
        let mut accumulator = GradientAccumulator::new(vars.clone());
        let mut metrics = TrainingMetricsCollector::new();

        if report_progress {
            info!(
                examples = dataset.len(),
                epochs = num_epochs,
                batch_size = plan.train_batch_size,
                gradient_accumulation_steps = accumulation,
                total_steps,
                mode = ?plan.mode,
                "***** Running training *****"
            );
        }

        'epochs: for epoch in 0..num_epochs {
            metrics.start_epoch();

            for (step, batch) in loader.epoch(epoch).enumerate() {
                let batch = batch?;
                let inputs = Processor::get_inputs(&batch, model.model_name(), true)?;
                let labels = inputs.labels.as_ref().ok_or_else(|| {
                    ClassifierError::invalid_argument("labels", "Training batches must carry labels")
                })?;

                let logits = match &half_model {
                    Some(half) => half.forward_t(&inputs.input_ids, &inputs.attention_mask, true)?,
                    None => model.forward(&inputs, true)?,
                }
                .to_dtype(DType::F32)?;
                let loss = candle_nn::loss::cross_entropy(&logits, labels)?
                    .affine(1.0 / accumulation as f64, 0.0)?;
                let loss_value = loss.to_scalar::<f32>()? as f64;
                metrics.record_micro_batch(loss_value);

                if report_progress && step % LOG_EVERY == 0 {
                    info!(
                        epoch,
                        step,
                        loss = loss_value / plan.train_batch_size as f64,
                        "Loss"
                    );
                }

                let loss = match &scaler {
                    Some(scaler) => scaler.scale_loss(&loss)?,
                    None => loss,
                };
                let mut grads = loss.backward()?;

                let window_closed = (step + 1) % accumulation == 0 || step + 1 == num_batches;
                if !window_closed {
                    accumulator.add(&grads)?;
                    continue;
                }

                accumulator.merge_into(&mut grads)?;
                plan.sync.all_reduce_mean(&mut grads, &vars)?;

                let applied = match scaler.as_mut() {
                    Some(scaler) => scaler.unscale_and_update(&mut grads, &vars)?,
                    None => true,
                };

                let lr = schedule.get_lr();
                let grad_norm = if applied {
                    let norm = clip_grad_norm(&mut grads, &vars, config.max_grad_norm)?;
                    optimizer.set_learning_rate(lr);
                    optimizer.step(&grads)?;
                    if let Some(half) = half_model.as_mut() {
                        *half = model.cast_model(config.precision.dtype())?;
                    }
                    Some(norm)
                } else {
                    None
                };
                schedule.step();
                metrics.record_step(lr, grad_norm, !applied);

                debug!(
                    global_step = metrics.global_step(),
                    lr,
                    grad_norm = ?grad_norm,
                    "Optimizer step"
                );

                if config.max_steps.is_some_and(|max| metrics.global_step() >= max) {
                    metrics.end_epoch(epoch);
                    break 'epochs;
                }
            }

            let summary = metrics.end_epoch(epoch);
            if report_progress {
                info!(
                    epoch,
                    steps = summary.steps,
                    average_loss = summary.average_loss,
                    elapsed = ?summary.duration,
                    "Epoch finished"
                );
            }
        }

        let report = metrics.finish(plan.train_batch_size);
        if report_progress {
            info!(
                global_step = report.global_step,
                average_loss = report.average_loss,
                elapsed = ?report.elapsed,
                "Training finished"
            );
        }
        Ok(report)
    }
}

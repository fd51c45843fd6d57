/// Which half of a conversion the worker is in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Import,
    Export,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub dataset: String,
    pub stage: Stage,
}

impl WorkerStatus {
    pub fn new(progress: f32, dataset: &str, stage: Stage) -> Self {
        Self {
            progress,
            dataset: dataset.to_string(),
            stage,
        }
    }
}

use std::{collections::BTreeMap, fs::File, io::BufWriter, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

/// The losses and metrics of a single epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
    pub metrics: BTreeMap<String, f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub val_loss: Option<f32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub val_metrics: BTreeMap<String, f32>,
}

impl EpochRecord {
    /// The loss used to pick the best epoch: the validation loss if there is one.
    pub fn monitored_loss(&self) -> f32 {
        self.val_loss.unwrap_or(self.loss)
    }
}

/// Everything recorded during a `fit` call, one record per epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochRecord>,
}

impl History {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// The epoch with the lowest monitored loss.
    pub fn best(&self) -> Option<&EpochRecord> {
        self.epochs
            .iter()
            .min_by(|a, b| a.monitored_loss().total_cmp(&b.monitored_loss()))
    }

    /// Writes the history as pretty printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, loss: f32, val_loss: Option<f32>) -> EpochRecord {
        EpochRecord {
            epoch,
            loss,
            val_loss,
            ..Default::default()
        }
    }

    #[test]
    fn best_prefers_validation_loss() {
        let history = History {
            epochs: vec![
                record(1, 0.5, Some(0.9)),
                record(2, 0.4, Some(0.7)),
                record(3, 0.1, Some(0.8)),
            ],
        };

        assert_eq!(history.best().unwrap().epoch, 2);
    }

    #[test]
    fn json_skips_missing_validation() {
        let mut history = History::default();
        history.push(record(1, 0.25, None));

        let json = serde_json::to_string(&history).unwrap();
        assert!(!json.contains("val_loss"));

        let back: History = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }
}

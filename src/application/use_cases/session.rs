use crate::domain::dataset::Dataset;
use crate::domain::error::{AppError, Result};
use crate::domain::history::SessionHistory;
use crate::domain::profile::SchemaProfile;
use std::sync::Arc;
use uuid::Uuid;

/// State of one exploration session: the active dataset snapshot and its history.
///
/// Replacing the dataset bumps `generation`; parse results carry the dataset fingerprint and are
/// rejected once it no longer matches.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    dataset: Option<Arc<Dataset>>,
    profile: Option<Arc<SchemaProfile>>,
    generation: u64,
    history: SessionHistory,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            dataset: None,
            profile: None,
            generation: 0,
            history: SessionHistory::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_dataset(&self) -> bool {
        self.dataset.is_some()
    }

    /// Swap in a new dataset wholesale
    pub fn replace_dataset(&mut self, dataset: Arc<Dataset>, profile: Arc<SchemaProfile>) {
        self.dataset = Some(dataset);
        self.profile = Some(profile);
        self.generation += 1;
    }

    /// The active dataset and its profile
    pub fn active(&self) -> Result<(Arc<Dataset>, Arc<SchemaProfile>)> {
        match (&self.dataset, &self.profile) {
            (Some(dataset), Some(profile)) => Ok((dataset.clone(), profile.clone())),
            _ => Err(AppError::NotFound(format!(
                "Session {} has no dataset loaded",
                self.id
            ))),
        }
    }

    pub fn profile(&self) -> Option<&Arc<SchemaProfile>> {
        self.profile.as_ref()
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut SessionHistory {
        &mut self.history
    }

    pub(crate) fn set_history(&mut self, history: SessionHistory) {
        self.history = history;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::schema_profiler::SchemaProfiler;
    use crate::domain::dataset::DatasetInput;
    use crate::domain::value::Value;

    #[test]
    fn test_replace_dataset_bumps_generation() {
        let mut session = Session::new();
        assert!(matches!(session.active(), Err(AppError::NotFound(_))));

        let dataset = Dataset::from_input(DatasetInput {
            columns: vec!["units".to_string()],
            rows: vec![vec![Value::Number(1.0)]],
            declared_kinds: Default::default(),
        })
        .unwrap();
        let profile = SchemaProfiler::default().profile(&dataset);

        session.replace_dataset(Arc::new(dataset), Arc::new(profile));
        assert_eq!(session.generation(), 1);
        assert!(session.has_dataset());

        let (dataset, profile) = session.active().unwrap();
        assert_eq!(dataset.fingerprint(), profile.fingerprint);
    }
}

use crate::errors::{AppError, AppResult};
use crate::models::{FilterSelection, VersionedFilter};
use tokio::sync::watch;

/// Versioned filter selection. The UI is the single writer; every widget reads a
/// snapshot and may subscribe to change notifications.
pub struct FilterState {
    sender: watch::Sender<VersionedFilter>,
}

impl FilterState {
    pub fn new(initial: FilterSelection) -> AppResult<Self> {
        let selection = initial.normalized();
        validate(&selection)?;
        let (sender, _) = watch::channel(VersionedFilter {
            version: 0,
            selection,
        });
        Ok(Self { sender })
    }

    pub fn snapshot(&self) -> VersionedFilter {
        self.sender.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.sender.borrow().version
    }

    pub fn subscribe(&self) -> watch::Receiver<VersionedFilter> {
        self.sender.subscribe()
    }

    /// Replaces the selection and bumps the version. An inverted date range is
    /// rejected and leaves the current selection untouched; an identical
    /// selection is accepted without a version change.
    pub fn set_filter(&self, selection: FilterSelection) -> AppResult<VersionedFilter> {
        let selection = selection.normalized();
        validate(&selection)?;

        let changed = self.sender.send_if_modified(|current| {
            if current.selection == selection {
                return false;
            }
            current.version += 1;
            current.selection = selection;
            true
        });

        let snapshot = self.snapshot();
        if changed {
            tracing::info!(
                version = snapshot.version,
                start = %snapshot.selection.date_range.start,
                end = %snapshot.selection.date_range.end,
                category = ?snapshot.selection.category,
                region = ?snapshot.selection.region,
                "filter selection changed"
            );
        }
        Ok(snapshot)
    }
}

fn validate(selection: &FilterSelection) -> AppResult<()> {
    let range = selection.date_range;
    if range.is_valid() {
        Ok(())
    } else {
        Err(AppError::InvalidRange(format!(
            "start date {} is after end date {}",
            range.start, range.end
        )))
    }
}

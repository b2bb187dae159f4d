use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::aggregate::Application;
use super::approval::{ApprovalRequest, RequestFilter};
use super::domain::{ApplicationId, QueryId, RequestId};
use super::events::{EventFilter, EventLogEntry};
use super::repository::{ApplicationWrite, QueryRepository, RepositoryError, WriteBatch};

#[derive(Default)]
struct StoreState {
    applications: HashMap<ApplicationId, Application>,
    app_numbers: HashMap<String, ApplicationId>,
    query_index: HashMap<QueryId, ApplicationId>,
    requests: BTreeMap<RequestId, ApprovalRequest>,
    events: Vec<EventLogEntry>,
}

impl StoreState {
    fn check(&self, write: &ApplicationWrite) -> Result<(), RepositoryError> {
        match write {
            ApplicationWrite::Insert(application) => {
                if self.applications.contains_key(&application.id)
                    || self.app_numbers.contains_key(&application.app_no)
                {
                    return Err(RepositoryError::Conflict);
                }
            }
            ApplicationWrite::Update(application) => {
                if !self.applications.contains_key(&application.id) {
                    return Err(RepositoryError::NotFound);
                }
            }
        }

        let application = write.application();
        let foreign_query = application.queries.iter().any(|query| {
            self.query_index
                .get(&query.id)
                .is_some_and(|owner| owner != &application.id)
        });
        if foreign_query {
            return Err(RepositoryError::Conflict);
        }
        Ok(())
    }

    fn apply(&mut self, write: ApplicationWrite) {
        let application = match write {
            ApplicationWrite::Insert(application) | ApplicationWrite::Update(application) => {
                application
            }
        };
        self.app_numbers
            .insert(application.app_no.clone(), application.id.clone());
        for query in &application.queries {
            self.query_index
                .insert(query.id.clone(), application.id.clone());
        }
        self.applications
            .insert(application.id.clone(), application);
    }
}

/// Process-local persistence adapter. Every commit happens under one write lock, so a
/// batch is visible to readers either completely or not at all.
#[derive(Default)]
pub struct InMemoryQueryStore {
    state: RwLock<StoreState>,
}

impl InMemoryQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, RepositoryError> {
        self.state
            .read()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, RepositoryError> {
        self.state
            .write()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }
}

impl QueryRepository for InMemoryQueryStore {
    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self.read()?.applications.get(id).cloned())
    }

    fn find_by_app_no(&self, app_no: &str) -> Result<Option<Application>, RepositoryError> {
        let state = self.read()?;
        Ok(state
            .app_numbers
            .get(app_no)
            .and_then(|id| state.applications.get(id))
            .cloned())
    }

    fn locate_query(&self, query_id: &QueryId) -> Result<Option<ApplicationId>, RepositoryError> {
        Ok(self.read()?.query_index.get(query_id).cloned())
    }

    fn list_applications(&self) -> Result<Vec<Application>, RepositoryError> {
        Ok(self.read()?.applications.values().cloned().collect())
    }

    fn fetch_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.read()?.requests.get(id).cloned())
    }

    fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        Ok(self
            .read()?
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect())
    }

    fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventLogEntry>, RepositoryError> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError> {
        let mut state = self.write()?;
        if let Some(write) = &batch.application {
            state.check(write)?;
        }

        if let Some(write) = batch.application {
            state.apply(write);
        }
        if let Some(request) = batch.request {
            state.requests.insert(request.id.clone(), request);
        }
        state.events.extend(batch.events);
        Ok(())
    }
}

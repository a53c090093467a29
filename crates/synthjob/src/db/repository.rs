//! Narrow repository capabilities.
//!
//! Each component depends only on the capabilities it uses, so tests can
//! substitute a small stand-in for any one of them. `Database` implements
//! all of them.

use super::details_repo::{self, DetailsUpdate, NewProcessDetails};
use super::object_repo::{self, NewObject};
use super::process_repo::{self, ListFilter, NewProcess, ProcessUpdate};
use super::search_repo::{self, SearchFilter, SearchHit};
use super::{Database, DatabaseError};
use crate::domain::{Object, Process, ProcessDetails};

pub trait ObjectCreator: Send + Sync {
    fn create_object(&self, new: &NewObject) -> Result<Object, DatabaseError>;
}

pub trait ObjectGetter: Send + Sync {
    fn get_object(&self, id: i64) -> Result<Object, DatabaseError>;
    fn get_object_by_path(&self, bucket: &str, path: &str) -> Result<Object, DatabaseError>;
}

pub trait ProcessCreator: Send + Sync {
    fn create_process(&self, new: &NewProcess) -> Result<Process, DatabaseError>;
}

pub trait ProcessUpdater: Send + Sync {
    fn update_process(&self, id: i64, update: &ProcessUpdate) -> Result<Process, DatabaseError>;
}

pub trait ProcessGetter: Send + Sync {
    fn get_process(&self, id: i64) -> Result<Process, DatabaseError>;
    fn get_process_by_request_id(&self, request_id: &str) -> Result<Process, DatabaseError>;
    fn get_processes_by_details_ids(&self, ids: &[i64]) -> Result<Vec<Process>, DatabaseError>;
}

pub trait ProcessLister: Send + Sync {
    fn list_processes(&self, filter: &ListFilter) -> Result<Vec<Process>, DatabaseError>;
}

pub trait ProcessDetailsCreator: Send + Sync {
    fn create_details(&self, new: &NewProcessDetails) -> Result<ProcessDetails, DatabaseError>;
}

pub trait ProcessDetailsUpdater: Send + Sync {
    fn update_details(
        &self,
        id: i64,
        update: &DetailsUpdate,
    ) -> Result<ProcessDetails, DatabaseError>;
}

pub trait ProcessDetailsGetter: Send + Sync {
    fn get_details(&self, id: i64) -> Result<ProcessDetails, DatabaseError>;
    fn get_details_by_ids(&self, ids: &[i64]) -> Result<Vec<ProcessDetails>, DatabaseError>;
}

pub trait ProcessSearcher: Send + Sync {
    fn search_processes(&self, filter: &SearchFilter) -> Result<Vec<SearchHit>, DatabaseError>;
}

impl ObjectCreator for Database {
    fn create_object(&self, new: &NewObject) -> Result<Object, DatabaseError> {
        object_repo::insert(self, new)
    }
}

impl ObjectGetter for Database {
    fn get_object(&self, id: i64) -> Result<Object, DatabaseError> {
        object_repo::find_by_id(self, id)
    }

    fn get_object_by_path(&self, bucket: &str, path: &str) -> Result<Object, DatabaseError> {
        object_repo::find_by_path(self, bucket, path)
    }
}

impl ProcessCreator for Database {
    fn create_process(&self, new: &NewProcess) -> Result<Process, DatabaseError> {
        process_repo::insert(self, new)
    }
}

impl ProcessUpdater for Database {
    fn update_process(&self, id: i64, update: &ProcessUpdate) -> Result<Process, DatabaseError> {
        process_repo::update(self, id, update)
    }
}

impl ProcessGetter for Database {
    fn get_process(&self, id: i64) -> Result<Process, DatabaseError> {
        process_repo::find_by_id(self, id)
    }

    fn get_process_by_request_id(&self, request_id: &str) -> Result<Process, DatabaseError> {
        process_repo::find_by_request_id(self, request_id)
    }

    fn get_processes_by_details_ids(&self, ids: &[i64]) -> Result<Vec<Process>, DatabaseError> {
        process_repo::find_by_details_ids(self, ids)
    }
}

impl ProcessLister for Database {
    fn list_processes(&self, filter: &ListFilter) -> Result<Vec<Process>, DatabaseError> {
        process_repo::list(self, filter)
    }
}

impl ProcessDetailsCreator for Database {
    fn create_details(&self, new: &NewProcessDetails) -> Result<ProcessDetails, DatabaseError> {
        details_repo::insert(self, new)
    }
}

impl ProcessDetailsUpdater for Database {
    fn update_details(
        &self,
        id: i64,
        update: &DetailsUpdate,
    ) -> Result<ProcessDetails, DatabaseError> {
        details_repo::update(self, id, update)
    }
}

impl ProcessDetailsGetter for Database {
    fn get_details(&self, id: i64) -> Result<ProcessDetails, DatabaseError> {
        details_repo::find_by_id(self, id)
    }

    fn get_details_by_ids(&self, ids: &[i64]) -> Result<Vec<ProcessDetails>, DatabaseError> {
        details_repo::find_by_ids(self, ids)
    }
}

impl ProcessSearcher for Database {
    fn search_processes(&self, filter: &SearchFilter) -> Result<Vec<SearchHit>, DatabaseError> {
        search_repo::search(self, filter)
    }
}

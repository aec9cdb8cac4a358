pub mod extraction;
pub mod reconcile;
pub mod remote;
pub mod storage;

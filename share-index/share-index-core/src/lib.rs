pub mod acl;
pub mod adaptor;
pub mod config;
pub mod delegate;
pub mod docid;
pub mod error;
pub mod index;
pub mod named;
pub mod publisher;
pub mod search;

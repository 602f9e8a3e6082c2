//! Type definitions for the pybox execution API
//!
//! This crate holds the request and response shapes exchanged between the
//! HTTP layer and its callers. Keeping them separate from the orchestration
//! core lets clients depend on the contract without pulling in the container
//! runtime stack.
//!
//! ## Example
//!
//! ```rust
//! use pybox_types::ExecuteRequest;
//!
//! let request: ExecuteRequest = serde_json::from_str(r#"{"code": "print('hi')"}"#).unwrap();
//!
//! assert_eq!(request.work_dir, "/data");
//! assert!(request.timeout.is_none());
//! ```

pub mod health;
pub mod types;

pub use health::*;
pub use types::*;

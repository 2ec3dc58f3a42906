//! Adapter for the vendor's callback-driven streaming SDK.
mod adapter;
mod model;
mod sdk;

pub use adapter::NativeProvider;
pub use model::NativeModel;
pub use sdk::{NativeFailure, NativeListener, NativeRequest, NativeResponse, NativeSdkClient};

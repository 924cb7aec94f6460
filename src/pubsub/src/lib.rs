// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Google Cloud Client Libraries for Rust - Pub/Sub streaming pull
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. Testing is also incomplete, we do
//! **not** recommend that you use this crate in production. We welcome feedback
//! about the APIs, documentation, missing features, bugs, etc.
//!
//! This crate contains the client-side message delivery pipeline for
//! [Pub/Sub] subscriptions. It keeps a streaming pull open (or issues
//! synchronous pulls), extends message leases while the application works,
//! batches acknowledgements, and applies client-side flow control.
//!
//! The RPC transport is supplied by the application through the
//! [stub::Subscriber] trait.
//!
//! [pub/sub]: https://cloud.google.com/pubsub

pub use gax::Result;
pub use gax::error::Error;

pub mod error;
pub mod model;
pub mod subscriber;

pub mod builder {
    pub use crate::subscriber::builder::StreamingPull;
}

pub mod client {
    pub use crate::subscriber::client::Subscriber;
}

pub mod stub {
    pub use crate::subscriber::stub::{ResponseStream, Subscriber};
}

pub mod options {
    pub use crate::subscriber::flow_controller::LimitExceededBehavior;
}

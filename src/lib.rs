//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod codec;
pub mod error;
pub mod host;
pub mod message;
pub mod server;
pub mod stat;
pub mod transport;

pub use client::{ApiClient, ClientError, LoginHandler};
pub use codec::{Body, Codec};
pub use error::{codes, ApiError, SrmpError};
pub use host::HostOptions;
pub use message::{ApiMessage, Frame};
pub use server::{ApiManager, ApiServer, Call, ServerOptions, Session};

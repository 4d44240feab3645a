// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Request correlation, reader task and notification routing.
pub mod dispatcher;
/// Typed failures of a connection.
pub mod error;
/// Content-Length framing.
pub mod framing;
/// JSON-RPC message shapes.
pub mod message;
/// Child process pipes.
pub mod transport;

pub use dispatcher::{Dispatcher, ID_BASE, Reply};
pub use error::{ProtocolError, RpcError};
pub use message::RequestId;
pub use transport::{StderrSink, Transport};

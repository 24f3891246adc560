// Copyright 2025 lansim contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type SimResult<T> = Result<T, SimError>;

/// The fatal error channel.
///
/// Recoverable conditions (checksum mismatch, firewall block, transport
/// failure) never appear here: they are carried as control frames or retried
/// in place. An `Err` of this type aborts the owning device's construction
/// or processing loop.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIo(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// configuration-time format errors, fatal at construction
    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("malformed traffic script line: {0}")]
    MalformedScript(String),

    #[error("malformed firewall rule: {0}")]
    MalformedRule(String),

    /// wire-level errors
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("cannot send on unattached port {0}")]
    UnattachedPort(String),

    #[error(
        "the ports required by this simulation are in use; if it ran recently, \
         wait a moment while the OS releases them ({0})"
    )]
    PortsInUse(String),

    /// protocol invariant violations
    #[error(
        "ack for sequence {sequence} does not match the pending payload: \
         sent {sent:?}, acknowledged {acked:?}"
    )]
    AckPayloadMismatch {
        sequence: u8,
        sent: String,
        acked: String,
    },
}

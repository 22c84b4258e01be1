// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Helpers for backing out a partially applied operation.

use std::fmt;

use slog::{error, Logger};

use crate::types::{PipeError, PipeResult};

/// Combine the error that aborted an operation with the result of undoing the
/// steps already taken.  If the undo succeeded the caller just sees the
/// original error.
pub(crate) fn unwind(
    log: &Logger,
    initial: PipeError,
    undo: PipeResult<()>,
) -> PipeError {
    match undo {
        Ok(()) => initial,
        Err(unwind) => {
            error!(log, "failed to roll back";
                "initial" => %initial,
                "unwind" => %unwind);
            PipeError::Unwind {
                initial: Box::new(initial),
                unwind: Box::new(unwind),
            }
        }
    }
}

/// Log errors from a cleanup step without propagating them.
pub(crate) fn log_rollback_error<T, E: fmt::Debug>(
    log: &Logger,
    operation: &str,
    context: &str,
    result: Result<T, E>,
) {
    if let Err(e) = result {
        error!(
            log,
            "failed operation during rollback";
            "operation" => operation,
            "context" => context,
            "error" => ?e,
        );
    }
}

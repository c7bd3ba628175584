//! Group-wide termination on construction errors.

use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshError;

/// Exit code passed to [`Communicator::abort`].
pub const ABORT_CODE: i32 = 1;

/// Log `err` and terminate every process of the group.
pub fn abort_group<C: Communicator>(comm: &C, err: &MeshError) -> ! {
    log::error!(
        "rank {} of {}: fatal {}error: {err}",
        comm.rank(),
        comm.size(),
        if err.is_construction_error() { "construction " } else { "" }
    );
    comm.abort(ABORT_CODE)
}

/// Unwrap a result or abort the group.
pub trait OrAbort<T> {
    fn or_abort<C: Communicator>(self, comm: &C) -> T;
}

impl<T> OrAbort<T> for Result<T, MeshError> {
    fn or_abort<C: Communicator>(self, comm: &C) -> T {
        match self {
            Ok(v) => v,
            Err(e) => abort_group(comm, &e),
        }
    }
}

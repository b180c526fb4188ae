// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Assembles the payload of a successful read request into its caller-visible form.
///
/// Striped reads land their bytes in per-sub-operation staging buffers; how those are
/// stitched together is decided by the request-construction layer, not by the
/// completion machinery. The completion merely guarantees *when* assembly happens:
/// after the last sub-operation reported and before the user callback observes the
/// result, and only if the finalized result is non-negative.
pub trait ReadAssembler: Send {
    /// Stitches the staged sub-operation payloads together.
    fn assemble(&mut self);
}

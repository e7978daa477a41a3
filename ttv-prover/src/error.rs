// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use ttv_ir::ir::Op;

/// The one structured error of the encoder: an operation, type or construct
/// the encoding does not cover. Shape mismatches, out-of-bounds accesses and
/// aliasing are *not* errors; they become well-definedness obligations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported: {reason}{}", .op.as_ref().map(|o| format!(" in `{}`", o)).unwrap_or_default())]
pub struct Unsupported {
    /// Rendered handle of the offending op, when one is known.
    pub op: Option<String>,
    pub reason: String,
}

impl Unsupported {
    pub fn msg(reason: impl Into<String>) -> Unsupported {
        Unsupported { op: None, reason: reason.into() }
    }

    pub fn in_op(op: &Op, reason: impl Into<String>) -> Unsupported {
        Unsupported { op: Some(op.to_string()), reason: reason.into() }
    }
}

pub type EncodeResult<T> = Result<T, Unsupported>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_op_when_present() {
        let e = Unsupported::msg("quantized form");
        assert_eq!(e.to_string(), "unsupported: quantized form");
        let with_op = Unsupported { op: Some("%0 = foo".to_string()), reason: "bad".to_string() };
        assert_eq!(with_op.to_string(), "unsupported: bad in `%0 = foo`");
    }
}

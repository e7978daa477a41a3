// SPDX-License-Identifier: Apache-2.0

pub mod affine;
pub mod easy_smt_backend;
pub mod encode;
pub mod error;
pub mod memory;
pub mod solver;
pub mod state;
pub mod term_backend;
pub mod uf;
pub mod value;

//! Distributed finite element assembly and geometric multigrid operator generation.
//!
//! The crate is organized bottom-up: [`element`] and [`quadrature`] provide reference element
//! data, [`mesh`] and [`field`] describe the rank-local discretization, [`assembly`] turns
//! weak-form terms into distributed matrices and vectors ([`linalg`]), and [`multigrid`] builds
//! the transfer operators of a geometric multigrid hierarchy. Ranks communicate through the
//! [`comm::Communicator`] abstraction.
pub mod assembly;
pub mod comm;
pub mod element;
pub mod error;
pub mod field;
pub mod function;
pub mod grid;
pub mod linalg;
pub mod mesh;
pub mod multigrid;
pub mod quadrature;

#[cfg(feature = "proptest")]
pub mod proptest;

pub use error::{Error, Result};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

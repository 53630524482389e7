//! Cached evaluation of finite element fields, change-tracked scenes of region renditions, and
//! picking of the objects a scene draws.
pub mod basis;
pub mod callback;
pub mod field;
pub mod mesh;
pub mod picking;
pub mod region;
pub mod render;
pub mod rendition;
pub mod scene;
pub mod selection;
pub mod time;

pub extern crate nalgebra;

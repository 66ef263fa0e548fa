//! Provisioning services: the backend seam, the per-component operations on
//! `Provisioner`, the stack composer and the edge emulator.

pub mod backend;
pub mod distribution;
pub mod edge;
pub mod identity;
pub mod local_backend;
pub mod outputs;
pub mod provisioner;
pub mod publisher;
pub mod retry;
pub mod stack;
pub mod storage;

#[cfg(test)]
pub mod testing;

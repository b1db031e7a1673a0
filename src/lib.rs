//! # fedsim: federated learning experiments
//!
//! A coordinator drives many clients, each holding a private data partition, to train a shared
//! model without centralizing the data. Every round the coordinator selects a subset of the
//! clients, sends them the global weights, collects their locally trained weights and
//! combines them by federated averaging.
//!
//! The crate is organized leaves first:
//!
//! - [`model`] holds the [`Weights`] exchanged between the coordinator and the clients.
//! - [`data`] and [`divider`] describe the global dataset and how it is split into client
//!   partitions: IID, biased towards a label, sharded by label or a mix of IID and biased.
//! - [`trainer`] and [`algorithm`] are the seams to a machine learning framework. The crate
//!   ships a nearest-centroid trainer to exercise the protocol end to end.
//! - [`client`] runs the per-round client lifecycle and serves a [`transport`].
//! - [`selector`], [`aggregator`] and [`storage`] are the policies the coordinator plugs in.
//! - [`state_machine`] is the coordinator itself.
//!
//! All randomness flows through the explicitly owned generators of [`rng`], so a run is
//! reproducible from its seed and can be resumed from a checkpoint.
//!
//! [`Weights`]: crate::model::Weights

pub mod aggregator;
pub mod algorithm;
pub mod client;
pub mod common;
pub mod data;
pub mod divider;
pub mod model;
pub mod rng;
pub mod selector;
pub mod settings;
pub mod simulation;
pub mod state_machine;
pub mod storage;
pub mod trainer;
pub mod transport;

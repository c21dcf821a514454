#![cfg_attr(not(feature = "std"), no_std)]

//! Types shared between the sensor runtime and anything else that needs to
//! speak about the device: network status, LED sequences and the data model
//! attributes the sensor publishes.

pub mod led;
pub mod network;
pub mod sensor;
pub mod sequence;

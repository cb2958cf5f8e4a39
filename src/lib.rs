//! `ambilight` drives an LED installation surrounding one or more displays.
//!
//! # Structure
//!
//! On every tick, the [controller](controller::AmbilightController) takes a
//! snapshot of each display referenced by a strand ([capture]), maps the
//! strand LEDs to display areas ([geometry]), averages their pixels
//! ([image::sample]), and sends the resulting colors ([frame]) to the
//! microcontroller over a serial link ([transport]).
//!
//! # License
//!
//! This source code is released under the [MIT-License](https://opensource.org/licenses/MIT)

#[macro_use]
extern crate tracing;

pub mod capture;
pub mod controller;
pub mod frame;
pub mod geometry;
pub mod image;
pub mod models;
pub mod transport;

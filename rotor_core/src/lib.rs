//! # Rotor Core Library
//!
//! Backend of a sensor-aware control loop: decode a framed binary event
//! stream from a two-channel hall-sensor head, reconstruct physical motion
//! (cycles, rotations, direction, angular position), and drive a
//! deterministic execution gate that decides, each tick, whether a
//! downstream actor is permitted to act.
//!
//! ## Processing Chain
//!
//! bytes → [`codec`] frame → canonical event → [`cycles`] → [`tiles`] →
//! [`compass`] → [`movement`]; each tick [`activity`] and [`origin`]
//! refresh the tactile/awareness view and [`gate`] evaluates the
//! allow/deny decision. [`pipeline`] composes the whole chain behind
//! `feed_event` / `tick` / `snapshot`.
//!
//! ## Execution Model
//!
//! Single-threaded cooperative: every component is a plain state machine
//! advanced by serial calls, with no interior locking and no wall-clock
//! reads — timestamps arrive as inputs. All buffers are bounded.

pub mod activity;
pub mod codec;
pub mod compass;
pub mod cycles;
pub mod gate;
pub mod movement;
pub mod origin;
pub mod pipeline;
pub mod tiles;

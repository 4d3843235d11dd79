//! Real-time LAN chat hub with TCP and WebSocket front ends.
//!
//! Terminal clients speak a plain line protocol over TCP; browser
//! dashboards connect over WebSocket and receive the same chat lines plus
//! a live roster of participants. Each module focuses on a concrete
//! responsibility:
//!
//! - [`cli`] parses the command-line interface for hub and client modes.
//! - [`registry`] tracks live connections and the records of chat
//!   participants behind a single lock.
//! - [`recipient`] wraps each connection's outbound queue behind a uniform
//!   `deliver` capability.
//! - [`broadcast`] fans messages and roster updates out to every recipient.
//! - [`roster`] derives the sorted `[USER_LIST]:` frame.
//! - [`message`] formats chat/system lines and reads bounded input lines.
//! - [`enrichment`] resolves hostname and MAC details for a peer address.
//! - [`tcp`], [`websocket`] and [`http`] are the per-protocol adapters.
//! - [`hub`] binds the three listeners and runs them until shutdown.
//! - [`client`] is a small terminal client for the TCP protocol.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod enrichment;
pub mod http;
pub mod hub;
pub mod message;
pub mod recipient;
pub mod registry;
pub mod roster;
pub mod tcp;
pub mod websocket;

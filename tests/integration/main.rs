//! Integration tests driving the connection manager and session driver against in-memory
//! transport and signaling mocks. No sockets are opened.

mod connection_tests;
mod mock_rtc;

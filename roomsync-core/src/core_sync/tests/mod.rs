//! Multi-component scenarios for the synchronizer

mod e2e_two_clients;
mod helpers;

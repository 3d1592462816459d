//! Integration tests

mod support;
mod test_dispatch;
mod test_fsm;
mod test_scenarios;
mod test_webhook;

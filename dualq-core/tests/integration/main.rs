mod coexistence;
mod common;
mod scenarios;

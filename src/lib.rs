//! Covid-19 x-ray classification API.
//!
//! An HTTP front end for a long-running model worker process. Requests are
//! turned into line commands on the worker's stdin, identical concurrent
//! requests share one command, and answers are matched back by content key.

pub mod web;

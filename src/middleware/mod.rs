//! Middleware module - operator authentication

pub mod auth;

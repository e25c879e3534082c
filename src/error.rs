use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

use crate::config::parser::ConfigError;

pub struct FatalError(pub Box<dyn Error>);

impl Debug for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for FatalError {}

#[derive(Debug)]
struct Msg(String);

impl Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for Msg {}

impl From<ConfigError> for FatalError {
    fn from(e: ConfigError) -> Self {
        FatalError(Box::new(e))
    }
}

impl From<std::io::Error> for FatalError {
    fn from(e: std::io::Error) -> Self {
        FatalError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for FatalError {
    fn from(e: std::net::AddrParseError) -> Self {
        FatalError(Box::new(e))
    }
}

impl From<String> for FatalError {
    fn from(s: String) -> Self {
        FatalError(Box::new(Msg(s)))
    }
}

impl From<&str> for FatalError {
    fn from(s: &str) -> Self {
        FatalError(Box::new(Msg(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, FatalError>;

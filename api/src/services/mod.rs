pub mod accessor;
pub mod db;
pub mod error;
pub mod finish;
pub mod middleware;
pub mod outcome;

#[cfg(test)]
pub(crate) mod testing;

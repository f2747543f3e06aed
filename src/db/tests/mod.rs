pub mod helpers;

mod tests_basic;
mod tests_concurrency;
mod tests_iterator;

pub(crate) mod mocks;

mod conversation;
mod happy_path;

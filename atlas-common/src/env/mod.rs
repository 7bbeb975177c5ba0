pub mod block;
pub mod consensus;
pub mod state;
pub mod validator;

pub mod init;
pub mod tensor;

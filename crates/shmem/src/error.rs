use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShmemError>;

#[derive(Error, Debug)]
pub enum ShmemError {
    #[error("open shared memory object {name}: {source}")]
    Open { name: String, source: nix::Error },
    #[error("size shared memory object {name}: {source}")]
    Resize { name: String, source: nix::Error },
    #[error("map shared memory object {name}: {source}")]
    Map { name: String, source: nix::Error },
    #[error("process table has no free slot for pid {0}")]
    TableFull(i32),
}

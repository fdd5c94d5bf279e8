use thiserror::Error;

/// 调度核心边界上的错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 调用方提供了不可用的目标（零端口或空地址）
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// 路由器没有匹配到任何规则
    #[error("no routing rule matched")]
    NoMatch,

    /// 既无命中的出站也无默认出站
    #[error("no outbound handler available")]
    NoHandler,

    /// 写端已正常关闭，读端已读尽剩余数据
    #[error("pipe closed")]
    PipeClosed,

    /// 管道被中断，两端均已释放
    #[error("pipe interrupted")]
    PipeInterrupted,

    /// 限时读取超时，未取得数据
    #[error("read timed out")]
    Timeout,

    /// 注册表拒绝重复的出站 tag
    #[error("duplicate outbound tag: {0}")]
    DuplicateTag(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// PipeClosed 是正常终止路径，不作为错误记录
    pub fn is_normal_close(&self) -> bool {
        matches!(self, Error::PipeClosed)
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            Error::PipeClosed => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e),
            Error::PipeInterrupted => {
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, e)
            }
            Error::Timeout => std::io::Error::new(std::io::ErrorKind::TimedOut, e),
            other => std::io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! 套接字与管道链路之间的双向字节搬运。
//!
//! 入站侧和出站侧共用同一个入口：链路的读端灌入套接字写半边，
//! 套接字读半边灌入链路写端。两个方向互不等待，各自处理半关闭；
//! 异常终止通过取消令牌立即传到另一个方向。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buf::{self, Buffer};
use crate::common::Error;
use crate::pipe::StreamReader;
use crate::proxy::Link;

/// 在套接字与链路之间搬运字节直到两个方向都终止。
/// 返回 (套接字→链路, 链路→套接字) 的字节数。
///
/// 终止规则：套接字 EOF 关闭链路写端；链路 EOF（对端正常关闭）
/// 半关闭套接字写方向；IO 错误或管道中断则中断两端并取消对向。
pub async fn relay_link<S>(stream: S, link: Link) -> (u64, u64)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let Link { reader, writer } = link;
    let cancel = CancellationToken::new();

    let ingress = async {
        let mut total = 0u64;
        loop {
            let mut buffer = Buffer::new();
            let n = tokio::select! {
                r = read_half.read(buffer.extend(buf::SIZE)) => match r {
                    Ok(0) => {
                        writer.close();
                        return total;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!(error = %e, "socket read failed");
                        writer.interrupt();
                        cancel.cancel();
                        return total;
                    }
                },
                _ = cancel.cancelled() => {
                    writer.interrupt();
                    return total;
                }
            };
            buffer.resize(0, n);
            total += n as u64;
            if let Err(e) = writer.write(buffer.into()).await {
                if !e.is_normal_close() {
                    debug!(error = %e, "link write failed");
                    cancel.cancel();
                }
                return total;
            }
        }
    };

    let egress = async {
        let mut total = 0u64;
        loop {
            let mut mb = tokio::select! {
                r = reader.read() => match r {
                    Ok(mb) => mb,
                    Err(Error::PipeClosed) => {
                        let _ = write_half.shutdown().await;
                        return total;
                    }
                    Err(e) => {
                        debug!(error = %e, "link read failed");
                        cancel.cancel();
                        return total;
                    }
                },
                _ = cancel.cancelled() => {
                    reader.interrupt();
                    return total;
                }
            };
            while let Some(buffer) = mb.split_first() {
                total += buffer.len() as u64;
                if let Err(e) = write_half.write_all(buffer.bytes()).await {
                    debug!(error = %e, "socket write failed");
                    reader.interrupt();
                    cancel.cancel();
                    return total;
                }
            }
        }
    };

    let (up, down) = tokio::join!(ingress, egress);
    debug!(up = up, down = down, "relay finished");
    (up, down)
}

//! Fair merge of two channel streams.
//!
//! Within one input, order is preserved; across inputs there is no ordering
//! guarantee. The merged stream closes only once both inputs have closed, so
//! a cancelled pipeline drains producers first and the merge follows.

use tokio::sync::mpsc;

use crate::walk::STREAM_DEPTH;

/// Forward items from `a` and `b` into `out` until both close or the
/// downstream goes away. `select!` picks a ready branch at random, so a busy
/// input cannot starve a quiet one.
pub async fn merge_into<T: Send + 'static>(
    mut a: mpsc::Receiver<T>,
    mut b: mpsc::Receiver<T>,
    out: mpsc::Sender<T>,
) {
    let mut a_open = true;
    let mut b_open = true;
    while a_open || b_open {
        tokio::select! {
            item = a.recv(), if a_open => match item {
                Some(item) => {
                    if out.send(item).await.is_err() {
                        return;
                    }
                }
                None => a_open = false,
            },
            item = b.recv(), if b_open => match item {
                Some(item) => {
                    if out.send(item).await.is_err() {
                        return;
                    }
                }
                None => b_open = false,
            },
        }
    }
}

/// Spawn a merge task and return the merged receiver.
pub fn merged<T: Send + 'static>(
    a: mpsc::Receiver<T>,
    b: mpsc::Receiver<T>,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(STREAM_DEPTH);
    tokio::spawn(merge_into(a, b, tx));
    rx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

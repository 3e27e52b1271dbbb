//! Fuzz target: Noise responder handshake
//!
//! Drives arbitrary bytes into a `NoiseFrameHelper` holding a fixed PSK.
//! The helper must either fail cleanly or keep waiting; it must never
//! panic or reach DATA without a valid initiator message.
//!
//! cargo fuzz run fuzz_noise_handshake

#![no_main]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::rc::Rc;
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use native_api::app::ports::Socket;
use native_api::frame::{FrameHelper, FrameState, NoiseContext, NoiseFrameHelper};

struct Feed(Rc<RefCell<VecDeque<u8>>>);

impl Socket for Feed {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut q = self.0.borrow_mut();
        if q.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(q.len());
        for (dst, src) in buf.iter_mut().zip(q.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Ok(bufs.iter().map(|b| b.len()).sum())
    }

    fn set_nonblocking(&mut self, _: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_nodelay(&mut self, _: bool) -> io::Result<()> {
        Ok(())
    }

    fn peer_name(&self) -> String {
        "fuzz".into()
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let ctx = Arc::new(NoiseContext::new("fuzz", "00:00:00:00:00:00"));
    ctx.set_psk([0x42; 32]);

    let queue = Rc::new(RefCell::new(data.iter().copied().collect::<VecDeque<u8>>()));
    let mut helper = NoiseFrameHelper::new(Box::new(Feed(queue)), ctx);
    if helper.init().is_err() {
        return;
    }
    for _ in 0..4 {
        match helper.poll() {
            Err(e) if !e.is_would_block() => {
                assert!(matches!(helper.state(), FrameState::Failed | FrameState::Closed));
                return;
            }
            _ => {}
        }
    }
    assert_ne!(helper.state(), FrameState::Data, "handshake accepted garbage");
});

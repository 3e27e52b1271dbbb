//! Fuzz target: `PlaintextFrameHelper::read_packet`
//!
//! Feeds arbitrary bytes, split at an arbitrary point, into the plaintext
//! frame reader and asserts it never panics and never yields a payload
//! larger than the input.
//!
//! cargo fuzz run fuzz_plaintext_frame

#![no_main]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use native_api::app::ports::Socket;
use native_api::frame::{FrameHelper, PlaintextFrameHelper};

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
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(data.len());

    let queue = Rc::new(RefCell::new(VecDeque::new()));
    let mut helper = PlaintextFrameHelper::new(Box::new(Feed(queue.clone())));
    if helper.init().is_err() {
        return;
    }

    for chunk in [&data[..split], &data[split..]] {
        queue.borrow_mut().extend(chunk.iter().copied());
        loop {
            match helper.read_packet() {
                Ok(packet) => assert!(packet.payload.len() <= data.len()),
                Err(_) => break,
            }
        }
    }
});

//! Two hot threads logging through the global logger while the I/O thread
//! does all the formatting and output.

use std::io;
use std::thread;

fn main() {
    oluk::global().start_io_thread();
    oluk::global()
        .start_logging(Box::new(io::stdout()), Box::new(io::stdout()))
        .unwrap();

    let handles: Vec<_> = (0..2)
        .map(|t| {
            thread::spawn(move || {
                for i in 0..5 {
                    oluk::log(move |log| log.summary(&format!("thread {} message {}", t, i)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    oluk::global().stop_logging().unwrap();
    oluk::global().stop_io_thread();
}

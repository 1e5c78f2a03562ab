//! Simple serial probe
//!
//! Sends each of the given letters to the microcontroller and prints the reply class, for checking
//! a car on the bench without running the full executable.

use std::{thread, time::Duration};

use comms_if::{
    cmd::Ack,
    serial::{SerialTransport, Transport},
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "serial_probe")]
struct Opt {
    /// Serial device path, e.g. /dev/ttyACM0
    port: String,

    /// Baud rate of the device
    #[structopt(default_value = "115200")]
    baud: u32,

    /// Letters to send, one at a time
    #[structopt(default_value = "S")]
    letters: String,

    /// Delay between writing a letter and reading the reply, in milliseconds
    #[structopt(long, default_value = "50")]
    reply_delay_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let mut port = SerialTransport::open(&opt.port, opt.baud, Duration::from_secs(1))?;

    // Let the device reset after the port opens, then drop its banner
    println!("Connected to {}, waiting for device reset", opt.port);
    thread::sleep(Duration::from_secs(2));
    port.clear_input()?;

    for letter in opt.letters.bytes() {
        port.write_all(&[letter])?;
        thread::sleep(Duration::from_millis(opt.reply_delay_ms));

        let ack = Ack::from_reply(port.read_byte()?);
        println!("{:?} -> {}", letter as char, ack);
    }

    Ok(())
}

use std::io::{BufRead, Write};

use greymatter::config::BusOptions;
use greymatter::sys::sim::SimDriver;
use greymatter::{BoardManager, RamStore};

fn main() -> greymatter::Result<()> {
    env_logger::init();

    let mut manager = BoardManager::new(
        SimDriver::new(), BusOptions::default(), RamStore::new());
    manager.init_all()?;

    println!("GreyMatter DAC Controller console (simulated hardware)");
    println!("Type commands, e.g. *IDN? or BOARD0:DAC2:CH0:VOLT 2.5; Ctrl-D exits.");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        println!("{}", manager.execute_line(&line));
    }
    Ok(())
}

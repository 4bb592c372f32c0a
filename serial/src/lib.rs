// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A serial port driver, used to print debug output over COM1.
//!
//! This is the kernel's only logging sink: there is no leveled or
//! structured logging framework, just `println!` at subsystem
//! initialisation, on panics, and at the handful of points worth a
//! diagnostic message (frame pool exhaustion, eviction, fault details).

#![no_std]

use core::fmt;
use core::fmt::Write;
use lazy_static::lazy_static;
use uart_16550::SerialPort;

lazy_static! {
    /// The serial port used for debug output.
    pub static ref COM1: spin::Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(0x3F8) };
        serial_port.init();
        spin::Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        COM1.lock()
            .write_fmt(args)
            .expect("printing to serial failed");
    });
}

/// Prints to COM1, without a trailing newline.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::_print(format_args!($($arg)*));
    };
}

/// Prints to COM1, with a trailing newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

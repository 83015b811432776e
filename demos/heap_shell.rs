use std::{
  fmt,
  io::{self, BufRead, Write},
  process, ptr,
  ptr::NonNull,
};

use kheap::{ErrorKind, FatalSink, LockedHeap, OrHalt};

const HEAP_SIZE: usize = 1024 * 1024;

/// Prints the report the way the kernel does and stops the "machine".
struct HaltSink;

impl FatalSink for HaltSink {
  fn fatal(
    &self,
    message: fmt::Arguments<'_>,
    kind: ErrorKind,
  ) -> ! {
    println!("[PANIC] {} [{}]", message, kind);
    process::exit(1)
  }
}

static SINK: HaltSink = HaltSink;
static HEAP: LockedHeap = LockedHeap::empty(&SINK);

/// Maps anonymous pages to stand in for the board's heap region.
fn map_heap_region(len: usize) -> *mut u8 {
  let base = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if base == libc::MAP_FAILED {
    eprintln!("mmap of {} bytes failed", len);
    process::exit(1);
  }

  base.cast()
}

fn print_banner() {
  println!("========================================");
  println!("  kheap shell  v{}", env!("CARGO_PKG_VERSION"));
  println!("========================================");
  println!();
  println!("  Heap: {} KiB at {:#x}", HEAP_SIZE / 1024, HEAP.head().map_or(0, |h| h.addr));
  println!();
  println!("Type 'h' for help.");
}

fn print_help() {
  println!("  a <bytes>   allocate");
  println!("  f <addr>    free a pointer returned by 'a' (hex)");
  println!("  l           list blocks");
  println!("  r           remaining free bytes");
  println!("  q           exit");
}

fn list_blocks() {
  HEAP.with_heap(|heap| {
    for block in heap.blocks() {
      println!(
        "  {:#014x}  {:>8} bytes  {}",
        block.payload_addr(),
        block.size(),
        block.state()
      );
    }
  });
}

fn parse_addr(arg: &str) -> Option<NonNull<u8>> {
  let digits = arg.trim_start_matches("0x");
  let addr = usize::from_str_radix(digits, 16).ok()?;
  NonNull::new(addr as *mut u8)
}

fn run_command(line: &str) -> bool {
  let mut words = line.split_whitespace();

  match (words.next(), words.next()) {
    (None, _) => {}
    (Some("q"), _) => {
      println!("Exiting...");
      return false;
    }
    (Some("h"), _) => print_help(),
    (Some("l"), _) => list_blocks(),
    (Some("r"), _) => println!("  {} bytes free", HEAP.remaining()),
    (Some("a"), Some(arg)) => match arg.parse::<usize>() {
      Ok(size) => match HEAP.allocate(size).or_halt(&SINK) {
        Some(ptr) => println!("  {:#x}", ptr.as_ptr() as usize),
        None => println!("  nothing to allocate"),
      },
      Err(_) => println!("  not a size: {}", arg),
    },
    (Some("f"), Some(arg)) => match parse_addr(arg) {
      // The shell trusts the user to pass back an address printed by 'a'.
      Some(ptr) => unsafe { HEAP.free(Some(ptr)) }.or_halt(&SINK),
      None => println!("  not an address: {}", arg),
    },
    _ => println!("Unknown command. Type 'h' for help."),
  }

  true
}

fn main() {
  env_logger::init();

  let start = map_heap_region(HEAP_SIZE);
  unsafe { HEAP.init(start, start.wrapping_add(HEAP_SIZE)) }.or_halt(&SINK);

  print_banner();

  let stdin = io::stdin();
  loop {
    print!("kheap > ");
    let _ = io::stdout().flush();

    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
      Ok(0) | Err(_) => break,
      Ok(_) => {}
    }

    if !run_command(line.trim()) {
      break;
    }
  }
}

use std::{
    env,
    error::Error,
    ffi::OsString,
    fmt::Write as _,
    fs::File,
    io::{BufWriter, Write},
};

use lz77pack::*;

#[cfg(feature = "std")]
fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<OsString> = env::args_os().collect();

    if args.len() < 4 {
        println!("Usage: {} c|C|d|t input output", args[0].to_string_lossy());
        println!("  c  compress");
        println!("  C  compress without overlapping backreferences");
        println!("  d  decompress");
        println!("  t  list the tokens the compressor picks");
        return Ok(());
    }

    let mode = &args[1];
    let inp_fn = &args[2];
    let outp_fn = &args[3];

    let inp = std::fs::read(inp_fn)?;
    let outp;

    match mode.to_str() {
        Some("c") => {
            outp = compress(&inp)?;
        }
        Some("C") => {
            let opts = CompressOptions::default().with_allow_overlap(false);
            outp = CompressState::new_boxed().compress_to_vec(&inp, &opts)?;
        }
        Some("d") => {
            outp = decompress_to_vec(&inp, None)?;
        }
        Some("t") => {
            let mut toks: Vec<Token> = Vec::new();
            CompressState::new_boxed().compress_tokens(
                &inp,
                &CompressOptions::default(),
                &mut toks,
            )?;

            let mut listing = String::new();
            let mut at = 0;
            for tok in toks {
                match tok {
                    Token::Literal(b) => writeln!(listing, "{at:08x} lit {b:02x}")?,
                    Token::Backref { dist, len } => {
                        writeln!(listing, "{at:08x} ref -{dist} x{len}")?
                    }
                }
                at += tok.covered_len();
            }
            outp = listing.into_bytes();
        }
        _ => {
            println!("Invalid mode {}", mode.to_string_lossy());
            return Ok(());
        }
    }

    let mut outp_f = BufWriter::new(File::create(outp_fn)?);
    outp_f.write_all(&outp)?;
    outp_f.flush()?;

    Ok(())
}

#[cfg(not(feature = "std"))]
fn main() {
    println!("Demo requires std feature");
}

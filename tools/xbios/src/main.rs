#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use xbios::layout::{DEFAULT_MCPX_BLOCK_SIZE, KEY_SIZE};
use xbios::{
    replicate_data, Bios, BiosStatus, BootParamsMode, BootloaderMode, BuildConfig, BuildParams,
    KernelKeyMode, LoadParams, Lz4Codec, Mcpx, McpxRevision, Tamper,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Revision {
    /// MCPX 1.0: no preloader.
    #[value(name = "1.0")]
    V1_0,
    /// MCPX 1.1: preloader below the boot ROM.
    #[value(name = "1.1")]
    V1_1,
}

impl From<Revision> for McpxRevision {
    fn from(rev: Revision) -> Self {
        match rev {
            Revision::V1_0 => McpxRevision::V1_0,
            Revision::V1_1 => McpxRevision::V1_1,
        }
    }
}

fn parse_key(s: &str) -> Result<[u8; KEY_SIZE], String> {
    let bytes = hex::decode(s.trim()).map_err(|err| format!("invalid hex key: {err}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("key must be {KEY_SIZE} bytes, got {}", bytes.len()))
}

fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let (digits, scale) = match s.chars().last() {
        Some('k' | 'K') => (&s[..s.len() - 1], 1024),
        Some('m' | 'M') => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => digits.parse::<u32>(),
    }
    .map_err(|err| format!("invalid size {s:?}: {err}"))?;
    value
        .checked_mul(scale)
        .ok_or_else(|| format!("size {s:?} out of range"))
}

/// How the image was produced; shared by every command that loads or builds one.
#[derive(Debug, Clone, Args)]
struct LoadArgs {
    /// Size of one ROM copy inside the image (defaults to the image size).
    #[arg(long, value_parser = parse_size)]
    romsize: Option<u32>,

    /// Bootloader key (32 hex digits).
    #[arg(long, value_parser = parse_key)]
    bldr_key: Option<[u8; KEY_SIZE]>,

    /// Kernel key (32 hex digits); defaults to the key stored in the bootloader.
    #[arg(long, value_parser = parse_key)]
    kernel_key: Option<[u8; KEY_SIZE]>,

    /// Boot ROM revision.
    #[arg(long, value_enum, default_value = "1.0")]
    mcpx: Revision,

    /// Secret boot key from the boot ROM (32 hex digits); enables the preloader path.
    #[arg(long, value_parser = parse_key)]
    sbkey: Option<[u8; KEY_SIZE]>,

    /// Size of the boot ROM block at the top of the image.
    #[arg(long, value_parser = parse_size, default_value_t = DEFAULT_MCPX_BLOCK_SIZE as u32)]
    mcpx_block_size: u32,

    /// The bootloader is stored in plaintext.
    #[arg(long)]
    plain_bldr: bool,

    /// The compressed kernel is stored in plaintext.
    #[arg(long)]
    plain_kernel: bool,

    /// Boot params are encrypted along with the bootloader.
    #[arg(long)]
    no_restore_boot_params: bool,
}

impl LoadArgs {
    fn to_params(&self) -> LoadParams {
        let mut mcpx = Mcpx::new(self.mcpx.into());
        mcpx.block_size = self.mcpx_block_size as usize;
        mcpx.sbkey = self.sbkey;
        LoadParams {
            romsize: self.romsize,
            bldr_key: self.bldr_key,
            kernel_key: self.kernel_key,
            mcpx,
            enc_bldr: !self.plain_bldr,
            enc_kernel: !self.plain_kernel,
            restore_boot_params: !self.no_restore_boot_params,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "xbios")]
#[command(about = "Inspect, unpack and assemble Xbox system ROM images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load an image and print what was found.
    Info {
        image: PathBuf,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Load an image and write each decrypted component to a directory.
    Extract {
        image: PathBuf,

        /// Directory to write the components to (created if missing).
        #[arg(long, short)]
        out_dir: PathBuf,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Assemble an image from loose components.
    Build {
        /// Init table.
        #[arg(long)]
        init_tbl: PathBuf,

        /// Bootloader block (plaintext).
        #[arg(long)]
        bldr: PathBuf,

        /// Preloader block (MCPX 1.1 only).
        #[arg(long)]
        preldr: Option<PathBuf>,

        /// Compressed kernel stream.
        #[arg(long, required_unless_present = "kernel_image")]
        compressed_kernel: Option<PathBuf>,

        /// Uncompressed kernel image; compressed before it is placed.
        #[arg(long, conflicts_with = "compressed_kernel")]
        kernel_image: Option<PathBuf>,

        /// Kernel data section.
        #[arg(long)]
        kernel_data: Option<PathBuf>,

        /// EEPROM key to store in the bootloader (32 hex digits).
        #[arg(long, value_parser = parse_key)]
        eeprom_key: Option<[u8; KEY_SIZE]>,

        /// Certificate key to store in the bootloader (32 hex digits).
        #[arg(long, value_parser = parse_key)]
        cert_key: Option<[u8; KEY_SIZE]>,

        /// Size of the output image.
        #[arg(long, value_parser = parse_size, default_value = "1m")]
        binsize: u32,

        /// Output image path.
        #[arg(long, short)]
        out: PathBuf,

        /// Boot-from-media bootloader.
        #[arg(long)]
        bfm: bool,

        /// Corrupt the init table identifier.
        #[arg(long, conflicts_with = "hack_signature")]
        hack_inittbl: bool,

        /// Store an inverted boot signature.
        #[arg(long)]
        hack_signature: bool,

        /// Encrypt the boot params with the rest of the bootloader.
        #[arg(long)]
        no_boot_params: bool,

        /// Encrypt the kernel with an all-zero key.
        #[arg(long, conflicts_with = "kernel_key")]
        zero_kernel_key: bool,

        /// Recompute the ROM digest in the preloader block.
        #[arg(long)]
        fix_digest: bool,

        /// Ask the kernel to copy its data section late.
        #[arg(long)]
        delay_kernel_data: bool,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Tile a ROM up to a larger image size.
    Replicate {
        input: PathBuf,

        /// Size of the output image.
        #[arg(long, value_parser = parse_size, default_value = "1m")]
        binsize: u32,

        /// Output image path.
        #[arg(long, short)]
        out: PathBuf,
    },
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("read {}", path.display()))
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).with_context(|| format!("write {}", path.display()))
}

fn load_image(image: &Path, load: &LoadArgs) -> Result<Bios> {
    let buf = read(image)?;
    tracing::debug!(path = %image.display(), size = buf.len(), "read image");
    let params = load.to_params();
    let mut bios = Bios::new();
    if bios.load(buf, &params) == BiosStatus::Failed {
        bail!("{}: not a loadable image", image.display());
    }
    Ok(bios)
}

fn info(bios: &Bios) {
    println!("status: {:?}", bios.status());
    println!("preloader: {:?}", bios.preldr_status());
    println!("image size: {:#x}", bios.size());
    println!("rom size: {:#x}", bios.romsize());
    if let Some(block) = bios.bldr().block() {
        println!(
            "bootloader: {:#x} ({})",
            block.offset,
            if bios.bldr().is_encrypted() {
                "encrypted"
            } else {
                "decrypted"
            }
        );
    }
    if let Some(key) = bios.preldr_public_key() {
        println!(
            "public key: exponent {}, {} bits",
            key.header.exponent, key.header.bits
        );
        println!(
            "rom signature: {}",
            if bios.preldr().rom_verified() {
                "verified"
            } else {
                "unverified"
            }
        );
    }
    if let Some(bp) = bios.boot_params() {
        println!("kernel size: {:#x}", bp.krnl_size);
        println!(
            "kernel data size: {:#x}{}",
            bp.kernel_data_size(),
            if bp.delays_data_copy() { " (delayed)" } else { "" }
        );
        println!("init table size: {:#x}", bp.inittbl_size);
    }
    if let Some(ldr) = bios.ldr_params() {
        println!("entry point: {:#010x}", ldr.bldr_entry_point);
        println!("command line: {:?}", ldr.command_line_str());
    }
    if let Some(keys) = bios.bldr_keys() {
        println!("eeprom key: {}", hex::encode(keys.eeprom_key));
        println!("cert key: {}", hex::encode(keys.cert_key));
        println!("kernel key: {}", hex::encode(keys.krnl_key));
    }
    if let Some(tbl) = bios.init_table() {
        println!("init table: identifier {:#06x}, kernel {}", tbl.identifier, tbl.kernel_ver);
    }
    if let Some(img) = bios.kernel_image() {
        println!("kernel image: {:#x} bytes", img.len());
    }
    if bios.status() == BiosStatus::Success {
        println!("available space: {:#x}", bios.available_space());
    }
}

fn extract(bios: &Bios, out_dir: &Path) -> Result<()> {
    if bios.status() != BiosStatus::Success {
        bail!("bootloader did not validate; check the keys and revision");
    }
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;

    let parts: [(&str, Option<&[u8]>); 7] = [
        ("bldr.bin", bios.bldr_data()),
        ("preldr.bin", bios.preldr_data()),
        ("mcpx.bin", bios.mcpx_block()),
        ("inittbl.bin", bios.init_table_data()),
        ("krnl.bin", bios.compressed_kernel()),
        ("krnl_data.bin", bios.kernel_data()),
        ("xboxkrnl.img", bios.kernel_image()),
    ];
    for (name, data) in parts {
        let Some(data) = data else {
            continue;
        };
        let path = out_dir.join(name);
        write(&path, data)?;
        println!("{} ({:#x} bytes)", path.display(), data.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { image, load } => {
            let bios = load_image(&image, &load)?;
            info(&bios);
            Ok(())
        }
        Commands::Extract {
            image,
            out_dir,
            load,
        } => {
            let bios = load_image(&image, &load)?;
            extract(&bios, &out_dir)
        }
        Commands::Build {
            init_tbl,
            bldr,
            preldr,
            compressed_kernel,
            kernel_image,
            kernel_data,
            eeprom_key,
            cert_key,
            binsize,
            out,
            bfm,
            hack_inittbl,
            hack_signature,
            no_boot_params,
            zero_kernel_key,
            fix_digest,
            delay_kernel_data,
            load,
        } => {
            let compressed_kernel = match (compressed_kernel, kernel_image) {
                (Some(path), _) => read(&path)?,
                (None, Some(path)) => Lz4Codec::compress(&read(&path)?),
                (None, None) => bail!("--compressed-kernel or --kernel-image is required"),
            };
            let tamper = if hack_inittbl {
                Tamper::InitTable
            } else if hack_signature {
                Tamper::Signature
            } else {
                Tamper::None
            };
            let build = BuildParams {
                init_tbl: read(&init_tbl)?,
                preldr: preldr.as_deref().map(read).transpose()?,
                bldr: read(&bldr)?,
                compressed_kernel,
                kernel_data: kernel_data.as_deref().map(read).transpose()?.unwrap_or_default(),
                eeprom_key,
                cert_key,
                config: BuildConfig {
                    bootloader: if bfm {
                        BootloaderMode::BootFromMedia
                    } else {
                        BootloaderMode::Retail
                    },
                    tamper,
                    boot_params: if no_boot_params {
                        BootParamsMode::Omit
                    } else {
                        BootParamsMode::Restore
                    },
                    kernel_key: if zero_kernel_key {
                        KernelKeyMode::Zero
                    } else {
                        KernelKeyMode::Supplied
                    },
                    fix_digest,
                    delay_kernel_data,
                },
            };

            let mut bios = Bios::new();
            bios.build(&build, binsize, &load.to_params())
                .context("build image")?;
            write(&out, bios.data())?;
            println!(
                "{} ({:#x} bytes, {:#x} bytes free)",
                out.display(),
                bios.size(),
                bios.available_space()
            );
            Ok(())
        }
        Commands::Replicate {
            input,
            binsize,
            out,
        } => {
            let mut data = read(&input)?;
            let romsize = data.len();
            let binsize = binsize as usize;
            xbios::check_size(romsize).with_context(|| format!("{}", input.display()))?;
            xbios::check_size(binsize).context("--binsize")?;
            data.resize(binsize.max(romsize), 0);
            replicate_data(romsize, binsize, &mut data).context("replicate")?;
            write(&out, &data)?;
            println!("{} ({:#x} bytes)", out.display(), data.len());
            Ok(())
        }
    }
}

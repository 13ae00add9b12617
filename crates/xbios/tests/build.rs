#![cfg(not(target_arch = "wasm32"))]

mod common;

use common::*;
use xbios::crypto::sha1_digest;
use xbios::layout::{
    BLDR_BASE, BOOT_SIGNATURE, KEY_SIZE, MAX_BIOS_SIZE, MIN_BIOS_SIZE, PRELDR_BLOCK_SIZE,
    ROM_DIGEST_SIZE,
};
use xbios::{
    Bios, BiosStatus, BootParamsMode, BootloaderMode, BuildConfig, BuildError, BuildParams,
    KernelKeyMode, LoadError, LoadParams, PreldrStatus, Tamper,
};

fn with_config(config: BuildConfig) -> BuildParams {
    BuildParams {
        config,
        ..build_params()
    }
}

fn load(image: Vec<u8>, params: &LoadParams) -> Bios {
    let mut bios = Bios::new();
    bios.load(image, params);
    bios
}

#[test]
fn built_image_is_left_loaded_and_encrypted() {
    let params = v1_0_params();
    let mut bios = Bios::new();
    bios.build(&build_params(), MIN_BIOS_SIZE as u32, &params)
        .unwrap();

    assert_eq!(bios.status(), BiosStatus::Success);
    assert_eq!(bios.size(), MIN_BIOS_SIZE);
    assert!(bios.bldr().is_encrypted());
    assert!(bios.kernel().is_encrypted());
    assert!(bios.boot_params().is_none());
    assert!(bios.compressed_kernel().is_none());

    let built_space = bios.available_space();
    assert!(built_space > 0);
    assert_eq!(bios.init_table_data(), Some(init_table().as_slice()));
    let bios = load(bios.data().to_vec(), &params);
    assert_eq!(bios.available_space(), built_space);
}

#[test]
fn extracted_preloader_rebuilds_an_identical_image() {
    let params = v1_1_params();
    let build = BuildParams {
        preldr: Some(preloader()),
        ..build_params()
    };
    let image = build_image(&build, MAX_BIOS_SIZE, &params);

    let bios = load(image.clone(), &params);
    assert_eq!(bios.preldr_status(), PreldrStatus::BldrDecrypted);
    assert_eq!(bios.preldr_public_key(), Some(public_key()));
    let extracted = bios.preldr_data().unwrap().to_vec();
    assert_eq!(extracted, preloader());

    let rebuilt = build_image(
        &BuildParams {
            preldr: Some(extracted),
            ..build
        },
        MAX_BIOS_SIZE,
        &params,
    );
    assert_eq!(rebuilt, image);
    let bios = load(rebuilt, &params);
    assert_eq!(bios.preldr_status(), PreldrStatus::BldrDecrypted);
    assert_eq!(bios.kernel_image(), Some(kernel_image().as_slice()));
}

#[test]
fn small_rom_is_replicated_through_the_image() {
    let params = LoadParams {
        romsize: Some(MIN_BIOS_SIZE as u32),
        ..v1_0_params()
    };
    let image = build_image(&build_params(), MAX_BIOS_SIZE, &params);
    assert_eq!(image.len(), MAX_BIOS_SIZE);
    for copy in image.chunks(MIN_BIOS_SIZE) {
        assert_eq!(copy, &image[..MIN_BIOS_SIZE]);
    }

    let bios = load(image, &params);
    assert_eq!(bios.status(), BiosStatus::Success);
    assert_eq!(bios.romsize(), MIN_BIOS_SIZE);
    let tbl = bios.init_table_data().unwrap();
    assert_eq!(tbl, init_table().as_slice());
    assert_eq!(bios.kernel_image(), Some(kernel_image().as_slice()));

    let bldr = bios.bldr().block().unwrap();
    let rom_start = MAX_BIOS_SIZE - MIN_BIOS_SIZE;
    assert_eq!(
        bios.available_space(),
        bldr.offset - compressed_kernel().len() - KERNEL_DATA_SIZE - INIT_TBL_SIZE - rom_start
    );
}

#[test]
fn signature_tamper_rejects_bootloader_only_on_signature() {
    let params = v1_0_params();
    let image = build_image(
        &with_config(BuildConfig {
            tamper: Tamper::Signature,
            ..BuildConfig::default()
        }),
        MIN_BIOS_SIZE,
        &params,
    );

    let mut bios = Bios::new();
    bios.init(image, &params).unwrap();
    bios.symmetric_enc_dec_bldr(&BLDR_KEY, 0x5FDC);
    let bp = bios.boot_params().unwrap();
    assert_eq!(bp.signature, !BOOT_SIGNATURE);
    assert!(bp.digest_matches(&xbios::XboxCrypto));
    assert_eq!(
        bios.validate_bldr_boot_params(),
        Err(xbios::BootParamsError::BadSignature(!BOOT_SIGNATURE))
    );

    let data = bios.data().to_vec();
    bios.symmetric_enc_dec_bldr(&BLDR_KEY, 0x5FDC);
    let reencrypted = bios.data().to_vec();
    let bios = load(reencrypted, &params);
    assert_eq!(bios.status(), BiosStatus::SuccessInvalidBootloader);
    assert!(bios.bldr().is_encrypted());
    assert_ne!(bios.data(), data.as_slice());
}

#[test]
fn init_table_tamper_still_loads() {
    let params = v1_0_params();
    let image = build_image(
        &with_config(BuildConfig {
            tamper: Tamper::InitTable,
            ..BuildConfig::default()
        }),
        MIN_BIOS_SIZE,
        &params,
    );
    let bios = load(image, &params);
    assert_eq!(bios.status(), BiosStatus::Success);
    assert_eq!(bios.init_table().unwrap().identifier, !INIT_TBL_IDENTIFIER);
}

#[test]
fn zero_kernel_key_round_trips() {
    let params = v1_0_params();
    let image = build_image(
        &with_config(BuildConfig {
            kernel_key: KernelKeyMode::Zero,
            ..BuildConfig::default()
        }),
        MIN_BIOS_SIZE,
        &params,
    );

    let explicit = LoadParams {
        kernel_key: Some([0; KEY_SIZE]),
        ..v1_0_params()
    };
    let bios = load(image.clone(), &explicit);
    assert_eq!(bios.kernel_image(), Some(kernel_image().as_slice()));

    let stored = load(image, &params);
    assert_eq!(stored.bldr_keys().unwrap().krnl_key, [0; KEY_SIZE]);
    assert_eq!(stored.kernel_key(), [0; KEY_SIZE]);
    assert_eq!(stored.kernel_image(), Some(kernel_image().as_slice()));
}

#[test]
fn supplied_kernel_key_overrides_the_bootloader_copy() {
    let params = LoadParams {
        kernel_key: Some(*b"override-krnlkey"),
        ..v1_0_params()
    };
    let image = build_image(&build_params(), MIN_BIOS_SIZE, &params);

    let bios = load(image, &v1_0_params());
    assert_eq!(bios.bldr_keys().unwrap().krnl_key, *b"override-krnlkey");
    assert_eq!(bios.kernel_image(), Some(kernel_image().as_slice()));
}

#[test]
fn omitted_boot_params_need_a_full_block_decrypt() {
    let build = with_config(BuildConfig {
        boot_params: BootParamsMode::Omit,
        ..BuildConfig::default()
    });
    let image = build_image(&build, MIN_BIOS_SIZE, &v1_0_params());

    let full = LoadParams {
        restore_boot_params: false,
        ..v1_0_params()
    };
    let bios = load(image.clone(), &full);
    assert_eq!(bios.status(), BiosStatus::Success);
    assert_eq!(bios.kernel_image(), Some(kernel_image().as_slice()));

    let bios = load(image, &v1_0_params());
    assert_eq!(bios.status(), BiosStatus::SuccessInvalidBootloader);
}

#[test]
fn fixed_digest_covers_everything_below_the_preloader() {
    let build = BuildParams {
        preldr: Some(preloader()),
        ..with_config(BuildConfig {
            fix_digest: true,
            ..BuildConfig::default()
        })
    };
    let params = v1_1_params();
    let image = build_image(&build, MAX_BIOS_SIZE, &params);

    let preldr_start = MAX_BIOS_SIZE - 0x200 - PRELDR_BLOCK_SIZE;
    let bios = load(image.clone(), &params);
    assert_eq!(bios.preldr_status(), PreldrStatus::BldrDecrypted);

    let digest = bios.rom_digest().unwrap();
    assert_eq!(digest.len(), ROM_DIGEST_SIZE);
    assert_eq!(&digest[..20], &sha1_digest(&image[..preldr_start]));
    assert!(digest[20..].iter().all(|&b| b == 0));
}

#[test]
fn boot_from_media_stores_the_bootloader_key() {
    let params = v1_0_params();
    let image = build_image(
        &with_config(BuildConfig {
            bootloader: BootloaderMode::BootFromMedia,
            ..BuildConfig::default()
        }),
        MIN_BIOS_SIZE,
        &params,
    );
    let bios = load(image, &params);
    assert_eq!(bios.status(), BiosStatus::Success);
    assert_eq!(bios.bfm_key(), Some(BLDR_KEY));
    assert_eq!(bios.bldr_entry().unwrap().bfm_entry_point, BLDR_BASE);
}

#[test]
fn delay_flag_is_kept_out_of_the_layout() {
    let params = v1_0_params();
    let image = build_image(
        &with_config(BuildConfig {
            delay_kernel_data: true,
            ..BuildConfig::default()
        }),
        MIN_BIOS_SIZE,
        &params,
    );
    let bios = load(image, &params);
    assert_eq!(bios.status(), BiosStatus::Success);
    let bp = bios.boot_params().unwrap();
    assert!(bp.delays_data_copy());
    assert_eq!(bp.kernel_data_size(), KERNEL_DATA_SIZE);
    assert_eq!(bios.kernel_data(), Some(kernel_data().as_slice()));
}

#[test]
fn failed_build_leaves_nothing_behind() {
    let params = v1_0_params();
    let mut bios = Bios::new();
    bios.build(&build_params(), MIN_BIOS_SIZE as u32, &params)
        .unwrap();

    let missing_keys = BuildParams {
        bldr: vec![0; 0x100],
        ..build_params()
    };
    assert_eq!(
        bios.build(&missing_keys, MIN_BIOS_SIZE as u32, &params),
        Err(BuildError::KeysNotLocated)
    );
    assert_eq!(bios.status(), BiosStatus::Failed);
    assert!(bios.data().is_empty());

    assert_eq!(
        bios.build(&build_params(), (MIN_BIOS_SIZE - 1) as u32, &params),
        Err(BuildError::Size(LoadError::ImageSize {
            size: MIN_BIOS_SIZE - 1
        }))
    );

    let digest_without_preldr = with_config(BuildConfig {
        fix_digest: true,
        ..BuildConfig::default()
    });
    assert_eq!(
        bios.build(&digest_without_preldr, MAX_BIOS_SIZE as u32, &v1_1_params()),
        Err(BuildError::MissingComponent("preloader"))
    );

    let preldr_on_v1_0 = BuildParams {
        preldr: Some(preloader()),
        ..build_params()
    };
    assert_eq!(
        bios.build(&preldr_on_v1_0, MIN_BIOS_SIZE as u32, &params),
        Err(BuildError::PreldrUnsupported)
    );
}

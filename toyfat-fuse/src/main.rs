mod cli;

use std::fs;
use std::path::Path;

use clap::Parser;
use toyfat::{Error, Image, Result};
use typed_bytesize::ByteSizeIec;

use self::cli::{Cli, Command, Geometry};

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Mkfs { image, geometry } => {
            create(&image, &geometry)?.close()?;
        }
        Command::Pack {
            image,
            source,
            dest,
            geometry,
        } => {
            let mut fs = create(&image, &geometry)?;
            pack(&mut fs, &source, &dest)?;
            fs.close()?;
        }
        Command::Add {
            image,
            src,
            dest,
            exec,
        } => {
            let mut fs = Image::open(&image)?;
            let entry = fs.add_file(&dest, &fs::read(&src)?, exec)?;
            log::info!("{src:?} -> {dest:?}, {} bytes", entry.size);
            fs.close()?;
        }
        Command::Mkdir { image, path } => {
            let mut fs = Image::open(&image)?;
            fs.make_dir(&path)?;
            fs.close()?;
        }
        Command::Ls { image, path } => {
            let fs = Image::open(&image)?;
            for entry in fs.list_dir(&path)? {
                let kind = match (entry.is_dir(), entry.is_executable()) {
                    (true, _) => 'd',
                    (false, true) => 'x',
                    (false, false) => '-',
                };
                println!("{kind} {:>10} {}", entry.size, entry.name());
            }
            fs.close()?;
        }
        Command::Extract { image, path, out } => {
            let fs = Image::open(&image)?;
            fs::write(&out, fs.extract(&path)?)?;
            fs.close()?;
        }
        Command::Rm { image, path } => {
            let mut fs = Image::open(&image)?;
            fs.remove(&path)?;
            fs.close()?;
        }
        Command::Info { image } => {
            let fs = Image::open(&image)?;
            info(&fs)?;
            fs.close()?;
        }
    }

    Ok(())
}

fn create(image: &Path, geometry: &Geometry) -> Result<Image> {
    println!("image={image:?}");
    Image::create(image, geometry.sectors, geometry.sector_words)
}

/// 把`source`下的普通文件逐个放进镜像的`dest`目录
fn pack(fs: &mut Image, source: &Path, dest: &str) -> Result<()> {
    make_dirs(fs, dest)?;

    let mut apps = fs::read_dir(source)?
        .map(|app| app.map(|app| app.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    apps.sort();

    for app in apps {
        if !app.is_file() {
            continue;
        }
        let Some(name) = app.file_name().and_then(|name| name.to_str()) else {
            log::warn!("skipping {app:?}: name is not UTF-8");
            continue;
        };

        let data = fs::read(&app)?;
        let target = format!("{}/{name}", dest.trim_end_matches('/'));
        fs.add_file(&target, &data, is_executable(&app)?)?;
        println!("program: {target:?}, {} bytes", data.len());
    }

    Ok(())
}

/// 逐级创建目录，已存在的跳过
fn make_dirs(fs: &mut Image, path: &str) -> Result<()> {
    let mut current = String::new();
    for name in path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(name);
        match fs.resolve_path(&current)? {
            Some(entry) if entry.is_dir() => {}
            Some(_) => return Err(Error::NotADirectory(current)),
            None => {
                fs.make_dir(&current)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    Ok(fs::metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool> {
    Ok(false)
}

fn info(fs: &Image) -> Result<()> {
    let sb = fs.superblock();
    let sector_bytes = sb.sector_bytes() as u64;

    println!("magic          {:#010x}", sb.magic);
    println!("version        {}", sb.version);
    println!("sector size    {} words", sb.sector_size);
    println!("total sectors  {}", sb.total_sectors);
    println!("fat            {}..{}", sb.fat_start, sb.fat_start + sb.fat_sectors);
    println!("root           {}", sb.root_sector);
    println!("data           {}..{}", sb.data_start, sb.total_sectors);
    println!(
        "capacity       {}",
        ByteSizeIec(sb.total_sectors as u64 * sector_bytes)
    );
    println!(
        "free           {} ({})",
        sb.free_sectors,
        ByteSizeIec(sb.free_sectors as u64 * sector_bytes)
    );
    println!();
    println!("{}", fs.check()?);

    Ok(())
}

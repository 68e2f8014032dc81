use std::env;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use tracing::{info, trace};

use booru_imagelist::booru::{
    HttpTransport, HttpTransportConfig, Image, ImageList, ImageListEvent, JsonDocument, ListView,
    TempDir,
};
use booru_imagelist::{ConfigManager, Logger};

const CONFIG_DIR: &str = "config";

/// Prints what a list widget would show.
#[derive(Default)]
struct ConsoleView {
    slots: usize,
}

impl ListView for ConsoleView {
    fn reserve(&mut self, count: usize) {
        self.slots = count;
        trace!(slots = count, "View reserved slots");
    }

    fn set_selected(&mut self, index: usize) {
        println!("{} {}/{}", style("Selected").cyan(), index + 1, self.slots);
    }

    fn clear(&mut self) {
        self.slots = 0;
    }
}

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(page_path) = args.next() else {
        bail!("usage: booru_imagelist <page.json> [site name]");
    };
    let site_name = args.next().unwrap_or_else(|| "Danbooru".to_string());

    let config_manager = ConfigManager::new(CONFIG_DIR).context("Failed to load configuration")?;
    let app_config = config_manager.get_app_config();
    let _logger = Logger::init(&app_config).context("Failed to initialize logger")?;

    let site = Arc::new(config_manager.get_sites_config().site(&site_name)?);
    let document = JsonDocument::from_file(&page_path)
        .with_context(|| format!("Failed to read page {}", page_path))?;
    info!(site = site.name(), posts = document.len(), "Read page");

    let mut list = ImageList::new(
        Box::new(ConsoleView::default()),
        TempDir::init_global(&app_config.paths.temp_directory),
        HttpTransport::factory(HttpTransportConfig::default()),
        app_config.image_list_options(),
    );
    let events = list.subscribe();

    let report = list.load(&document, site, &[])?;
    println!(
        "{} {} accepted, {} rejected",
        style("Loaded").green().bold(),
        report.accepted,
        report.rejected
    );
    for warning in &report.warnings {
        println!("{} {}", style("warning:").yellow(), warning);
    }
    print_events(&events);

    if list.is_empty() {
        println!("No supported images in this page.");
        return Ok(());
    }

    loop {
        let mut items: Vec<String> = list.images().iter().map(describe).collect();
        items.push("Quit".to_string());

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select a post")
            .default(list.index())
            .items(&items)
            .interact()?;
        if selection >= list.len() {
            break;
        }

        list.set_current(selection, true, false);
        print_events(&events);
        if let Some(image) = list.current() {
            print_details(image);
        }
    }

    list.clear();
    print_events(&events);
    Ok(())
}

fn describe(image: &Image) -> String {
    let info = image.info();
    format!("#{} [{}] {} score {}", image.id(), info.rating, info.date, info.score)
}

fn print_details(image: &Image) {
    println!("  {}", style(image.post_url()).underlined());
    println!("  image:     {}", image.image_url());
    println!("  thumbnail: {} ({})", image.thumb_path().display(), image.thumbnail().state());
    if !image.info().source.is_empty() {
        println!("  source:    {}", image.info().source);
    }
    if let Some(notes) = image.notes_url() {
        println!("  notes:     {}", notes);
    }
    let tags: Vec<String> = image
        .tags()
        .iter()
        .map(|t| format!("{}:{}", t.tag_type, t.name))
        .collect();
    println!("  tags:      {}", tags.join(" "));
}

fn print_events(events: &flume::Receiver<ImageListEvent>) {
    for event in events.try_iter() {
        match event {
            ImageListEvent::CurrentChanged { index, post_id, site } => {
                println!("{} #{} on {} (index {})", style("Current").cyan(), post_id, site, index)
            }
            ImageListEvent::Cleared => println!("{}", style("Cleared").dim()),
        }
    }
}

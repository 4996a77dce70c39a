use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use patterngrams::{
    AnyPatternModel, Category, ClassCodec, IndexedCorpus, Pattern, PatternModelOptions,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a tokenized corpus (one sentence per line) into class codes
    Encode {
        /// Plain, .gz or .zst text files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Class file to read; built from the inputs when omitted
        #[arg(short, long)]
        classes: Option<PathBuf>,

        /// Where to write the class file when it is built
        #[arg(long, default_value = "corpus.cls")]
        write_classes: PathBuf,

        /// Output prefix; each input gets <prefix>.<n>.dat or <prefix>.dat
        #[arg(short, long, default_value = "corpus")]
        output: PathBuf,
    },

    /// Decode an encoded corpus back to text
    Decode {
        input: PathBuf,

        #[arg(short, long)]
        classes: PathBuf,
    },

    /// Train a pattern model over an encoded corpus
    Train {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        options: TrainArgs,
    },

    /// Print statistics of a model as JSON
    Report {
        model: PathBuf,

        /// Print the count histogram instead
        #[arg(long)]
        histogram: bool,
    },

    /// List all patterns of a model as tab separated values
    Print {
        model: PathBuf,

        #[arg(short, long)]
        classes: PathBuf,
    },

    /// Show the relations of one pattern
    Query {
        model: PathBuf,

        #[arg(short, long)]
        classes: PathBuf,

        /// Pattern text; {*} is a flexible gap, {*K*} a gap of K tokens
        pattern: String,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// JSON file with the training options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum number of occurrences
    #[arg(short = 't', long)]
    min_tokens: Option<u32>,

    /// Maximum pattern length
    #[arg(short = 'l', long)]
    max_length: Option<usize>,

    /// Keep occurrence references
    #[arg(short = 'i', long)]
    indexed: bool,

    /// Derive skip-grams from frequent n-grams
    #[arg(short = 's', long)]
    skipgrams: bool,

    /// Count skip-grams at every n-gram occurrence
    #[arg(long)]
    exhaustive: bool,

    #[arg(long)]
    min_skip_types: Option<u32>,

    #[arg(long)]
    max_skips: Option<usize>,

    /// Collapse skip-grams into flex-grams
    #[arg(short = 'f', long)]
    flexgrams: bool,

    /// Iterate patterns in first-occurrence order
    #[arg(long)]
    ordered: bool,

    /// Show progress
    #[arg(short, long)]
    verbose: bool,
}

impl TrainArgs {
    fn options(&self) -> Result<PatternModelOptions> {
        let mut options: PatternModelOptions = match &self.config {
            Some(path) => {
                let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                serde_json::from_reader(BufReader::new(file))?
            }
            None => PatternModelOptions::default(),
        };
        if let Some(min_tokens) = self.min_tokens {
            options.min_tokens = min_tokens;
        }
        if let Some(max_length) = self.max_length {
            options.max_length = max_length;
        }
        if let Some(min_skip_types) = self.min_skip_types {
            options.min_skip_types = min_skip_types;
        }
        if let Some(max_skips) = self.max_skips {
            options.max_skips = max_skips;
        }
        options.do_reverse_index |= self.indexed;
        options.do_skipgrams |= self.skipgrams;
        options.do_skipgrams_exhaustive |= self.exhaustive;
        options.do_flexgrams |= self.flexgrams;
        options.do_ordered |= self.ordered;
        options.verbose = self.verbose;
        Ok(options)
    }
}

fn print_relations(title: &str, relations: &[(Pattern, u32)], codec: &ClassCodec) -> Result<()> {
    println!("{} ({})", title, relations.len());
    for (pattern, count) in relations {
        println!("  {}\t{}", pattern.to_text(codec)?, count);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Encode {
            inputs,
            classes,
            write_classes,
            output,
        } => {
            let codec = match classes {
                Some(path) => ClassCodec::load(path)?,
                None => {
                    let codec = ClassCodec::build_from_files(&inputs)?;
                    codec.save(&write_classes)?;
                    println!("{} classes written to {}", codec.len(), write_classes.display());
                    codec
                }
            };
            for (i, input) in inputs.iter().enumerate() {
                let target = if inputs.len() == 1 {
                    output.with_extension("dat")
                } else {
                    output.with_extension(format!("{}.dat", i))
                };
                let written = codec.encode_file(input, &target)?;
                println!("{} -> {} ({} codes)", input.display(), target.display(), written);
            }
        }
        Command::Decode { input, classes } => {
            let codec = ClassCodec::load(classes)?;
            let mut stdout = BufWriter::new(io::stdout().lock());
            stdout.write_all(codec.decode_file(input)?.as_bytes())?;
            stdout.flush()?;
        }
        Command::Train {
            input,
            output,
            options,
        } => {
            let options = options.options()?;
            let corpus = IndexedCorpus::from_encoded_file(&input)?;
            let model = AnyPatternModel::train(&corpus, options)?;
            model.write(&output)?;
            println!("{}", serde_json::to_string_pretty(&model.report())?);
        }
        Command::Report { model, histogram } => {
            let model = AnyPatternModel::load(model)?;
            if histogram {
                for (count, patterns) in model.histogram() {
                    println!("{}\t{}", count, patterns);
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&model.report())?);
            }
        }
        Command::Print { model, classes } => {
            let model = AnyPatternModel::load(model)?;
            let codec = ClassCodec::load(classes)?;
            model.print(BufWriter::new(io::stdout().lock()), &codec)?;
        }
        Command::Query {
            model,
            classes,
            pattern,
        } => {
            let model = AnyPatternModel::load(model)?;
            let codec = ClassCodec::load(classes)?;
            let pattern = Pattern::from_text(&pattern, &codec)?;
            if pattern.is_empty() {
                bail!("empty pattern");
            }

            println!("{}\t{}", pattern.to_text(&codec)?, model.occurrence_count(&pattern));
            print_relations("children", &model.sub_children(&pattern), &codec)?;
            print_relations("parents", &model.sub_parents(&pattern), &codec)?;
            print_relations("templates", &model.templates(&pattern), &codec)?;
            if pattern.category() != Category::Ngram {
                print_relations("instances", &model.instances(&pattern), &codec)?;
            }
            if let Some(indexed) = model.as_indexed() {
                print_relations("left neighbours", &indexed.left_neighbours(&pattern), &codec)?;
                print_relations("right neighbours", &indexed.right_neighbours(&pattern), &codec)?;
                if pattern.skip_count() > 0 {
                    print_relations("skip content", &indexed.skip_content(&pattern), &codec)?;
                }
                print_relations("co-occurrences", &indexed.cooccurrences(&pattern), &codec)?;
            }
        }
    }
    Ok(())
}

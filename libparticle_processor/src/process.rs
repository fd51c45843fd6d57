use std::sync::mpsc::Sender;

use super::config::Config;
use super::dataset::{Property, PropertyValue};
use super::error::ProcessorError;
use super::particle_file::ParticleFile;
use super::worker_status::{Stage, WorkerStatus};

/// The main loop of a conversion.
///
/// Imports every dataset of the input file and exports each through the output driver,
/// reporting progress over `tx`. Progress runs from 0 to 1 over the whole job, with the
/// import counted as one unit of work and each export as another. The function to be
/// called by a separate thread (typically the UI).
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<(), ProcessorError> {
    let species = config.ion_species()?;
    let input_label = config.input_path.display().to_string();
    tx.send(WorkerStatus::new(0.0, &input_label, Stage::Import))?;

    let mut file = ParticleFile::load(
        &config.input_path,
        &config.input_driver,
        &species,
        &config.drivers,
    )?;
    let count = file.len();
    if let Some(name) = &config.name {
        for idx in 0..count {
            let label = if count > 1 {
                format!("{name}_{idx}")
            } else {
                name.clone()
            };
            file.dataset_mut(idx)?
                .set_property(Property::Name, PropertyValue::Text(label))?;
        }
    }
    let total = (count + 1) as f32;
    tx.send(WorkerStatus::new(1.0 / total, &input_label, Stage::Import))?;

    for idx in 0..count {
        let dataset = file.dataset(idx)?;
        let output = config.output_path_for(idx, count);
        spdlog::info!(
            "Exporting {} ({} steps, {} particles) to {}",
            dataset.name(),
            dataset.steps(),
            dataset.particles(),
            output.display()
        );
        tx.send(WorkerStatus::new(
            (idx + 1) as f32 / total,
            dataset.name(),
            Stage::Export,
        ))?;
        dataset.export_to_file(&output, &config.output_driver, &config.drivers)?;
        tx.send(WorkerStatus::new(
            (idx + 2) as f32 / total,
            dataset.name(),
            Stage::Export,
        ))?;
    }

    file.close_all()?;
    spdlog::info!("Done with conversion of {input_label}.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_process_converts_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dist.dat");
        std::fs::write(&input, "2\n0.001 0 0 0 0 0.0122\n-0.001 0 0 0 0 0.0121\n").unwrap();
        let config = Config {
            input_path: input,
            input_driver: String::from("OPAL"),
            output_path: dir.path().join("dist.h5"),
            output_driver: String::from("OPAL"),
            species: String::from("proton"),
            name: Some(String::from("beam")),
            ..Default::default()
        };

        let (tx, rx) = channel();
        process(config, tx).unwrap();
        let statuses: Vec<WorkerStatus> = rx.iter().collect();
        assert_eq!(statuses.first().unwrap().stage, Stage::Import);
        let last = statuses.last().unwrap();
        assert_eq!(last.stage, Stage::Export);
        assert_eq!(last.dataset, "beam");
        assert_eq!(last.progress, 1.0);
        // one scale across both stages
        assert!(statuses
            .windows(2)
            .all(|pair| pair[0].progress <= pair[1].progress));
        assert_eq!(statuses[1].stage, Stage::Import);
        assert_eq!(statuses[1].progress, 0.5);
        assert!(dir.path().join("dist.h5").exists());
    }

    #[test]
    fn test_process_rejects_unknown_output_driver() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dist.dat");
        std::fs::write(&input, "1\n0 0 0 0 0 0.0122\n").unwrap();
        let config = Config {
            input_path: input,
            input_driver: String::from("OPAL"),
            output_path: dir.path().join("out.dat"),
            output_driver: String::from("MadX"),
            species: String::from("proton"),
            ..Default::default()
        };
        let (tx, _rx) = channel();
        assert!(matches!(
            process(config, tx),
            Err(ProcessorError::DatasetError(_))
        ));
    }
}

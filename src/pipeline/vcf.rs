use std::io::{self, Write};

use crate::genomics::ReferenceSegment;
use crate::genotype::GenotypeCall;
use crate::pipeline::{Filter, IndelRecord, LocusRecord, SiteOverlap, SiteRecord, VariantStage};
use crate::CallerError;

const HEADER_PREFIX: &str = "##fileformat=VCFv4.2\n##source=germcall\n";

const HEADER_FIELDS: &str = "\
##INFO=<ID=SNVSB,Number=1,Type=Float,Description=\"SNV site strand bias\">
##INFO=<ID=SNVHPOL,Number=1,Type=Integer,Description=\"SNV contextual homopolymer length\">
##INFO=<ID=CIGAR,Number=A,Type=String,Description=\"CIGAR alignment for each alternate indel allele\">
##INFO=<ID=OVERLAP,Number=1,Type=String,Description=\"Relation of the site to overlapping indel calls\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype Quality\">
##FORMAT=<ID=GQX,Number=1,Type=Integer,Description=\"Conservative genotype quality\">
##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Filtered basecall depth used for site genotyping\">
##FORMAT=<ID=DPF,Number=1,Type=Integer,Description=\"Basecalls filtered from input prior to site genotyping\">
##FORMAT=<ID=AD,Number=.,Type=Integer,Description=\"Allelic depths for the ref and alt alleles in the order listed\">
##FORMAT=<ID=DPI,Number=1,Type=Integer,Description=\"Read depth associated with indel, taken from the site preceding the indel\">
##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Normalized, Phred-scaled likelihoods for genotypes\">
";

/// Terminal stage writing records as VCF lines.
#[derive(Debug)]
pub struct VcfSink<W: Write> {
    writer: W,
    reference: ReferenceSegment,
    sample_name: String,
    header_written: bool,
    records_written: usize,
}

impl<W: Write> VcfSink<W> {
    /// Sink writing to `writer`; `reference` supplies REF bases and indel anchors.
    pub fn new(writer: W, reference: ReferenceSegment) -> Self {
        Self {
            writer,
            reference,
            sample_name: "SAMPLE".to_string(),
            header_written: false,
            records_written: 0,
        }
    }

    /// Name used in the sample column header.
    pub fn with_sample_name(mut self, name: impl Into<String>) -> Self {
        self.sample_name = name.into();
        self
    }

    /// Data lines written so far.
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.writer.write_all(HEADER_PREFIX.as_bytes())?;
        writeln!(
            self.writer,
            "##contig=<ID={},length={}>",
            self.reference.chrom(),
            self.reference.range().end
        )?;
        for filter in Filter::ALL {
            writeln!(
                self.writer,
                "##FILTER=<ID={},Description=\"{}\">",
                filter.label(),
                filter.description()
            )?;
        }
        self.writer.write_all(HEADER_FIELDS.as_bytes())?;
        writeln!(
            self.writer,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}",
            self.sample_name
        )?;
        self.header_written = true;
        Ok(())
    }

    fn write_site(&mut self, site: &SiteRecord) -> io::Result<()> {
        let alt = if site.alt_bases.is_empty() {
            ".".to_string()
        } else {
            site.alt_bases
                .iter()
                .map(|&b| (b as char).to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut info = match site.strand_bias {
            Some(sb) => format!("SNVSB={sb:.1};SNVHPOL={}", site.hpol),
            None => format!("SNVHPOL={}", site.hpol),
        };
        match site.overlap {
            Some(SiteOverlap::IndelOverlap) => info.push_str(";OVERLAP=IndelOverlap"),
            Some(SiteOverlap::IndelConflict) => info.push_str(";OVERLAP=IndelConflict"),
            None => {}
        }
        let sample = &site.sample;
        let ad = join_numbers(sample.allele_depths.iter());
        writeln!(
            self.writer,
            "{chrom}\t{pos}\t.\t{ref_base}\t{alt}\t{qual}\t{filters}\t{info}\tGT:GQ:GQX:DP:DPF:AD\t{gt}:{gq}:{gqx}:{dp}:{dpf}:{ad}",
            chrom = self.reference.chrom(),
            pos = site.pos + 1,
            ref_base = site.ref_base as char,
            qual = site.qual,
            filters = site.filters,
            gt = render_genotype(&sample.genotype, sample.ploidy),
            gq = sample.gq,
            gqx = sample.gqx,
            dp = site.n_used_calls,
            dpf = site.n_unused_calls,
        )
    }

    fn write_indel(&mut self, indel: &IndelRecord) -> io::Result<()> {
        let range = indel.range.clone();
        let anchor = match range.start.checked_sub(1) {
            Some(pos) => self.reference.base(pos),
            None => b'N',
        };

        let mut ref_allele = vec![anchor];
        ref_allele.extend(self.reference.slice(range.clone()));

        let mut alts = Vec::with_capacity(indel.alleles.len());
        let mut cigars = Vec::with_capacity(indel.alleles.len());
        for allele in &indel.alleles {
            let mut alt = vec![anchor];
            alt.extend(self.reference.slice(range.start..allele.pos));
            alt.extend_from_slice(&allele.insert_seq);
            alt.extend(self.reference.slice(allele.right_pos()..range.end));
            alts.push(String::from_utf8_lossy(&alt).into_owned());

            let mut cigar = format!("{}M", 1 + allele.pos - range.start);
            if allele.delete_len > 0 {
                cigar.push_str(&format!("{}D", allele.delete_len));
            }
            if !allele.insert_seq.is_empty() {
                cigar.push_str(&format!("{}I", allele.insert_seq.len()));
            }
            if range.end > allele.right_pos() {
                cigar.push_str(&format!("{}M", range.end - allele.right_pos()));
            }
            cigars.push(cigar);
        }

        let sample = &indel.sample;
        let ad = join_numbers(std::iter::once(&sample.support.ref_count).chain(&sample.support.alt_counts));
        let dpi = sample
            .dpi
            .map(|d| d.to_string())
            .unwrap_or_else(|| ".".to_string());
        let pl = if sample.phred_loghood.is_empty() {
            ".".to_string()
        } else {
            join_numbers(sample.phred_loghood.iter())
        };
        writeln!(
            self.writer,
            "{chrom}\t{pos}\t.\t{ref_allele}\t{alts}\t{qual}\t{filters}\tCIGAR={cigars}\tGT:GQ:GQX:DPI:AD:PL\t{gt}:{gq}:{gqx}:{dpi}:{ad}:{pl}",
            chrom = self.reference.chrom(),
            pos = range.start.max(1),
            ref_allele = String::from_utf8_lossy(&ref_allele),
            alts = alts.join(","),
            qual = indel.qual,
            filters = indel.filters,
            cigars = cigars.join(","),
            gt = render_genotype(&sample.genotype, sample.ploidy),
            gq = sample.gq,
            gqx = sample.gqx,
        )
    }
}

fn join_numbers<'a, T: ToString + 'a>(values: impl Iterator<Item = &'a T>) -> String {
    values.map(ToString::to_string).collect::<Vec<_>>().join(",")
}

/// GT field: no-calls follow the reported ploidy.
fn render_genotype(call: &GenotypeCall, ploidy: Option<u8>) -> String {
    match (call, ploidy) {
        (GenotypeCall::NoCall, Some(0 | 1)) => ".".to_string(),
        (GenotypeCall::NoCall, _) => "./.".to_string(),
        (call, _) => call.to_string(),
    }
}

impl<W: Write> VariantStage for VcfSink<W> {
    fn process_site(&mut self, site: SiteRecord) -> Result<(), CallerError> {
        self.ensure_header()?;
        self.write_site(&site)?;
        self.records_written += 1;
        Ok(())
    }

    fn process_indel(&mut self, indel: IndelRecord) -> Result<(), CallerError> {
        self.ensure_header()?;
        self.write_indel(&indel)?;
        self.records_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CallerError> {
        self.ensure_header()?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Render records into a VCF string (useful for tests and snapshots).
pub fn render_records(reference: &ReferenceSegment, records: &[LocusRecord]) -> Result<String, CallerError> {
    let mut sink = VcfSink::new(Vec::new(), reference.clone());
    for record in records {
        sink.process(record.clone())?;
    }
    sink.flush()?;
    String::from_utf8(sink.into_inner())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "rendered VCF is not valid UTF-8").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::AlleleKey;
    use crate::genotype::SupportingReadStats;
    use crate::pipeline::{FilterSet, IndelSampleCall};

    #[test]
    fn deletion_is_anchored_on_previous_base() {
        let reference = ReferenceSegment::new("chr1", 0, b"ACGTACGTAC");
        let record = LocusRecord::Indel(IndelRecord {
            range: 4..6,
            alleles: vec![AlleleKey::deletion(4, 2)],
            qual: 50,
            is_forced_output: false,
            filters: FilterSet::new(),
            sample: IndelSampleCall {
                ploidy: Some(2),
                genotype: GenotypeCall::Diploid(0, 1),
                phred_loghood: vec![300, 0, 80],
                gq: 60,
                gqx: 60,
                gq_polymorphic: 60,
                support: SupportingReadStats {
                    ref_count: 3,
                    alt_counts: vec![7],
                },
                dpi: Some(12),
                ..IndelSampleCall::default()
            },
        });

        let vcf = render_records(&reference, &[record]).unwrap();
        let line = vcf.lines().last().unwrap();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[1], "4");
        assert_eq!(fields[3], "TAC");
        assert_eq!(fields[4], "T");
        assert_eq!(fields[7], "CIGAR=1M2D");
        assert_eq!(fields[9], "0/1:60:60:12:3,7:300,0,80");
        assert!(vcf.contains("##FILTER=<ID=IndelConflict"));
    }

    #[test]
    fn empty_stream_still_gets_header() {
        let reference = ReferenceSegment::new("chrM", 0, b"ACGT");
        let vcf = render_records(&reference, &[]).unwrap();
        assert!(vcf.starts_with("##fileformat=VCFv4.2"));
        assert!(vcf.lines().last().unwrap().starts_with("#CHROM"));
        assert!(vcf.contains("##FILTER=<ID=HighSNVSB"));
        assert!(vcf.contains("##INFO=<ID=SNVSB"));
    }
}
